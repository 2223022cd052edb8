use smol_str::SmolStr;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(SmolStr),
    Number(f64),
    Str(SmolStr),

    // keywords
    And,
    Break,
    Do,
    Else,
    Elseif,
    End,
    False,
    For,
    Function,
    Goto,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // symbols
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Hash,
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Colon,
    DoubleColon,
    Comma,
    Dot,
    Concat,
    Ellipsis,

    Eof,
}

impl Token {
    pub fn keyword(name: &str) -> Option<Token> {
        Some(match name {
            "and" => Token::And,
            "break" => Token::Break,
            "do" => Token::Do,
            "else" => Token::Else,
            "elseif" => Token::Elseif,
            "end" => Token::End,
            "false" => Token::False,
            "for" => Token::For,
            "function" => Token::Function,
            "goto" => Token::Goto,
            "if" => Token::If,
            "in" => Token::In,
            "local" => Token::Local,
            "nil" => Token::Nil,
            "not" => Token::Not,
            "or" => Token::Or,
            "repeat" => Token::Repeat,
            "return" => Token::Return,
            "then" => Token::Then,
            "true" => Token::True,
            "until" => Token::Until,
            "while" => Token::While,
            _ => return None,
        })
    }

    /// Rendering used in "near '...'" error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Name(s) => s.to_string(),
            Token::Number(n) => crate::value::Value::number_to_string(*n),
            Token::Str(s) => format!("\"{}\"", s),
            Token::And => "and".into(),
            Token::Break => "break".into(),
            Token::Do => "do".into(),
            Token::Else => "else".into(),
            Token::Elseif => "elseif".into(),
            Token::End => "end".into(),
            Token::False => "false".into(),
            Token::For => "for".into(),
            Token::Function => "function".into(),
            Token::Goto => "goto".into(),
            Token::If => "if".into(),
            Token::In => "in".into(),
            Token::Local => "local".into(),
            Token::Nil => "nil".into(),
            Token::Not => "not".into(),
            Token::Or => "or".into(),
            Token::Repeat => "repeat".into(),
            Token::Return => "return".into(),
            Token::Then => "then".into(),
            Token::True => "true".into(),
            Token::Until => "until".into(),
            Token::While => "while".into(),
            Token::Plus => "+".into(),
            Token::Minus => "-".into(),
            Token::Star => "*".into(),
            Token::Slash => "/".into(),
            Token::Percent => "%".into(),
            Token::Caret => "^".into(),
            Token::Hash => "#".into(),
            Token::Eq => "==".into(),
            Token::Ne => "~=".into(),
            Token::Le => "<=".into(),
            Token::Ge => ">=".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Assign => "=".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::LBrace => "{".into(),
            Token::RBrace => "}".into(),
            Token::LBracket => "[".into(),
            Token::RBracket => "]".into(),
            Token::Semi => ";".into(),
            Token::Colon => ":".into(),
            Token::DoubleColon => "::".into(),
            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Concat => "..".into(),
            Token::Ellipsis => "...".into(),
            Token::Eof => "<eof>".into(),
        }
    }
}
