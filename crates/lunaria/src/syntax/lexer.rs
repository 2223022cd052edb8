// Hand-written lexer. Produces one token at a time with its source line.

use smol_str::SmolStr;

use super::{CompileError, Token};

pub struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    pub line: u32,
    chunk_name: &'a str,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, chunk_name: &'a str) -> Lexer<'a> {
        Lexer {
            src: source.as_bytes(),
            pos: 0,
            line: 1,
            chunk_name,
        }
    }

    fn error(&self, msg: impl AsRef<str>) -> CompileError {
        CompileError::new(self.chunk_name, self.line, msg)
    }

    /// Snapshot for one-token probes; the original lexer is untouched.
    pub fn clone_state(&self) -> Lexer<'a> {
        Lexer {
            src: self.src,
            pos: self.pos,
            line: self.line,
            chunk_name: self.chunk_name,
        }
    }

    #[inline]
    fn peek(&self) -> u8 {
        self.src.get(self.pos).copied().unwrap_or(0)
    }

    #[inline]
    fn peek_at(&self, off: usize) -> u8 {
        self.src.get(self.pos + off).copied().unwrap_or(0)
    }

    #[inline]
    fn bump(&mut self) -> u8 {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn newline(&mut self) {
        // \n, \r, \r\n and \n\r all count as one line break.
        let first = self.bump();
        let second = self.peek();
        if (second == b'\n' || second == b'\r') && second != first {
            self.pos += 1;
        }
        self.line += 1;
    }

    /// Next token plus the line it starts on.
    pub fn next_token(&mut self) -> Result<(Token, u32), CompileError> {
        loop {
            match self.peek() {
                0 if self.pos >= self.src.len() => return Ok((Token::Eof, self.line)),
                b' ' | b'\t' | 0x0b | 0x0c => {
                    self.pos += 1;
                }
                b'\n' | b'\r' => self.newline(),
                b'-' if self.peek_at(1) == b'-' => {
                    self.pos += 2;
                    if self.peek() == b'[' {
                        if let Some(level) = self.long_bracket_level() {
                            self.read_long_string(level)?;
                            continue;
                        }
                    }
                    while self.pos < self.src.len() && self.peek() != b'\n' && self.peek() != b'\r'
                    {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }

        let line = self.line;
        let token = match self.peek() {
            b'0'..=b'9' => self.read_number()?,
            b'"' | b'\'' => self.read_string()?,
            b'[' if self.long_bracket_level().is_some() => {
                let level = self.long_bracket_level().unwrap();
                let s = self.read_long_string(level)?;
                Token::Str(s)
            }
            c if c == b'_' || c.is_ascii_alphabetic() => {
                let start = self.pos;
                while {
                    let c = self.peek();
                    c == b'_' || c.is_ascii_alphanumeric()
                } {
                    self.pos += 1;
                }
                let name = std::str::from_utf8(&self.src[start..self.pos])
                    .map_err(|_| self.error("invalid UTF-8 in identifier"))?;
                Token::keyword(name).unwrap_or_else(|| Token::Name(SmolStr::new(name)))
            }
            _ => self.read_symbol()?,
        };
        Ok((token, line))
    }

    fn read_symbol(&mut self) -> Result<Token, CompileError> {
        let c = self.bump();
        Ok(match c {
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'^' => Token::Caret,
            b'#' => Token::Hash,
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b'{' => Token::LBrace,
            b'}' => Token::RBrace,
            b'[' => Token::LBracket,
            b']' => Token::RBracket,
            b';' => Token::Semi,
            b',' => Token::Comma,
            b'=' => {
                if self.peek() == b'=' {
                    self.pos += 1;
                    Token::Eq
                } else {
                    Token::Assign
                }
            }
            b'~' => {
                if self.peek() == b'=' {
                    self.pos += 1;
                    Token::Ne
                } else {
                    return Err(self.error("unexpected symbol near '~'"));
                }
            }
            b'<' => {
                if self.peek() == b'=' {
                    self.pos += 1;
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.peek() == b'=' {
                    self.pos += 1;
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            b':' => {
                if self.peek() == b':' {
                    self.pos += 1;
                    Token::DoubleColon
                } else {
                    Token::Colon
                }
            }
            b'.' => {
                if self.peek() == b'.' {
                    self.pos += 1;
                    if self.peek() == b'.' {
                        self.pos += 1;
                        Token::Ellipsis
                    } else {
                        Token::Concat
                    }
                } else if self.peek().is_ascii_digit() {
                    self.pos -= 1;
                    return self.read_number();
                } else {
                    Token::Dot
                }
            }
            _ => {
                return Err(self.error(format!(
                    "unexpected symbol near '{}'",
                    (c as char).escape_default()
                )));
            }
        })
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.pos;
        if self.peek() == b'0' && matches!(self.peek_at(1), b'x' | b'X') {
            self.pos += 2;
            let hex_start = self.pos;
            while self.peek().is_ascii_hexdigit() {
                self.pos += 1;
            }
            if self.pos == hex_start {
                return Err(self.error("malformed number near '0x'"));
            }
            let text = std::str::from_utf8(&self.src[hex_start..self.pos]).unwrap();
            let n = u64::from_str_radix(text, 16)
                .map_err(|_| self.error(format!("malformed number near '0x{}'", text)))?;
            return Ok(Token::Number(n as f64));
        }
        while self.peek().is_ascii_digit() {
            self.pos += 1;
        }
        if self.peek() == b'.' {
            self.pos += 1;
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), b'e' | b'E') {
            self.pos += 1;
            if matches!(self.peek(), b'+' | b'-') {
                self.pos += 1;
            }
            if !self.peek().is_ascii_digit() {
                return Err(self.error("malformed number (missing exponent digits)"));
            }
            while self.peek().is_ascii_digit() {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        let n = text
            .parse::<f64>()
            .map_err(|_| self.error(format!("malformed number near '{}'", text)))?;
        Ok(Token::Number(n))
    }

    fn read_string(&mut self) -> Result<Token, CompileError> {
        let quote = self.bump();
        let mut out = Vec::new();
        loop {
            match self.peek() {
                0 if self.pos >= self.src.len() => {
                    return Err(self.error("unfinished string"));
                }
                b'\n' | b'\r' => return Err(self.error("unfinished string")),
                b'\\' => {
                    self.pos += 1;
                    let e = self.bump();
                    match e {
                        b'n' => out.push(b'\n'),
                        b't' => out.push(b'\t'),
                        b'r' => out.push(b'\r'),
                        b'a' => out.push(0x07),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'v' => out.push(0x0b),
                        b'\\' => out.push(b'\\'),
                        b'"' => out.push(b'"'),
                        b'\'' => out.push(b'\''),
                        b'\n' | b'\r' => {
                            self.pos -= 1;
                            self.newline();
                            out.push(b'\n');
                        }
                        b'x' => {
                            let mut v = 0u32;
                            for _ in 0..2 {
                                let d = self.peek();
                                let digit = (d as char)
                                    .to_digit(16)
                                    .ok_or_else(|| self.error("hexadecimal digit expected"))?;
                                v = v * 16 + digit;
                                self.pos += 1;
                            }
                            out.push(v as u8);
                        }
                        b'0'..=b'9' => {
                            let mut v = (e - b'0') as u32;
                            for _ in 0..2 {
                                if !self.peek().is_ascii_digit() {
                                    break;
                                }
                                v = v * 10 + (self.bump() - b'0') as u32;
                            }
                            if v > 255 {
                                return Err(self.error("decimal escape too large"));
                            }
                            out.push(v as u8);
                        }
                        _ => return Err(self.error("invalid escape sequence")),
                    }
                }
                c if c == quote => {
                    self.pos += 1;
                    break;
                }
                _ => out.push(self.bump()),
            }
        }
        let s = String::from_utf8(out).map_err(|_| self.error("invalid UTF-8 in string"))?;
        Ok(Token::Str(SmolStr::new(s)))
    }

    /// At a '[': level of a long-bracket opener ("[[", "[=[", ...), if any.
    fn long_bracket_level(&self) -> Option<usize> {
        if self.peek() != b'[' {
            return None;
        }
        let mut level = 0;
        while self.peek_at(1 + level) == b'=' {
            level += 1;
        }
        if self.peek_at(1 + level) == b'[' {
            Some(level)
        } else {
            None
        }
    }

    fn read_long_string(&mut self, level: usize) -> Result<SmolStr, CompileError> {
        self.pos += 2 + level;
        // A newline immediately after the opener is skipped.
        if matches!(self.peek(), b'\n' | b'\r') {
            self.newline();
        }
        let start = self.pos;
        loop {
            match self.peek() {
                0 if self.pos >= self.src.len() => {
                    return Err(self.error("unfinished long string"));
                }
                b']' => {
                    let mut eq = 0;
                    while self.peek_at(1 + eq) == b'=' {
                        eq += 1;
                    }
                    if eq == level && self.peek_at(1 + eq) == b']' {
                        let body = std::str::from_utf8(&self.src[start..self.pos])
                            .map_err(|_| self.error("invalid UTF-8 in string"))?;
                        self.pos += 2 + level;
                        return Ok(SmolStr::new(body));
                    }
                    self.pos += 1;
                }
                b'\n' | b'\r' => self.newline(),
                _ => self.pos += 1,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(src: &str) -> Vec<Token> {
        let mut lx = Lexer::new(src, "=test");
        let mut out = Vec::new();
        loop {
            let (t, _) = lx.next_token().unwrap();
            if t == Token::Eof {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn numbers() {
        assert_eq!(
            all_tokens("1 2.5 0x10 1e2 .5"),
            vec![
                Token::Number(1.0),
                Token::Number(2.5),
                Token::Number(16.0),
                Token::Number(100.0),
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            all_tokens(r#""a\n" '\x41' [[raw]]"#),
            vec![
                Token::Str("a\n".into()),
                Token::Str("A".into()),
                Token::Str("raw".into()),
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            all_tokens("a -- line comment\n--[[ long\ncomment ]] b"),
            vec![Token::Name("a".into()), Token::Name("b".into())]
        );
    }

    #[test]
    fn line_tracking() {
        let mut lx = Lexer::new("a\nb", "=test");
        assert_eq!(lx.next_token().unwrap().1, 1);
        assert_eq!(lx.next_token().unwrap().1, 2);
    }

    #[test]
    fn dotted_tokens() {
        assert_eq!(
            all_tokens(". .. ... :: :"),
            vec![
                Token::Dot,
                Token::Concat,
                Token::Ellipsis,
                Token::DoubleColon,
                Token::Colon,
            ]
        );
    }
}
