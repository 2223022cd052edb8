// Table: dense array part plus hashed part, same split as the reference
// implementation. Integer keys in 1..=len+1 live in the array; everything
// else goes through the hash map.

use ahash::AHashMap;
use smol_str::SmolStr;

use super::{TableRef, Value};

/// Hashable projection of a `Value` used as a table key. Nil and NaN are
/// rejected before construction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Int(i64),
    /// Non-integral numbers, keyed by bit pattern.
    FloatBits(u64),
    String(SmolStr),
    /// Reference-identity keys, keyed by pointer address.
    Ref(usize),
}

impl TableKey {
    /// Returns None for nil and NaN.
    pub fn from_value(v: &Value) -> Option<TableKey> {
        match v {
            Value::Nil => None,
            Value::Boolean(b) => Some(TableKey::Boolean(*b)),
            Value::Number(n) => {
                if n.is_nan() {
                    None
                } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                    Some(TableKey::Int(*n as i64))
                } else {
                    Some(TableKey::FloatBits(n.to_bits()))
                }
            }
            Value::String(s) => Some(TableKey::String(s.clone())),
            Value::Table(t) => Some(TableKey::Ref(std::rc::Rc::as_ptr(t) as usize)),
            Value::Function(f) => Some(TableKey::Ref(std::rc::Rc::as_ptr(f) as usize)),
            Value::Host(f) => Some(TableKey::Ref(std::rc::Rc::as_ptr(f) as usize)),
            Value::UserData(u) => Some(TableKey::Ref(std::rc::Rc::as_ptr(u) as usize)),
            Value::Coroutine(c) => Some(TableKey::Ref(std::rc::Rc::as_ptr(c) as usize)),
        }
    }
}

/// Hash-part slot. The original key value is kept so iteration can hand it
/// back (identity keys are otherwise unrecoverable from their address).
struct Entry {
    key: Value,
    value: Value,
}

#[derive(Default)]
pub struct Table {
    array: Vec<Value>,
    hash: AHashMap<TableKey, Entry>,
    metatable: Option<TableRef>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    pub fn with_capacity(narray: usize, nhash: usize) -> Table {
        Table {
            array: Vec::with_capacity(narray),
            hash: AHashMap::with_capacity(nhash),
            metatable: None,
        }
    }

    pub fn metatable(&self) -> Option<TableRef> {
        self.metatable.clone()
    }

    pub fn set_metatable(&mut self, mt: Option<TableRef>) {
        self.metatable = mt;
    }

    /// Index into the array part, if the key is an integer in range
    /// 1..=len+1 (len+1 allows appends).
    #[inline]
    fn array_index(&self, key: &Value) -> Option<usize> {
        if let Value::Number(n) = key {
            if n.fract() == 0.0 && *n >= 1.0 && *n <= self.array.len() as f64 + 1.0 {
                return Some(*n as usize - 1);
            }
        }
        None
    }

    pub fn raw_get(&self, key: &Value) -> Value {
        if let Some(i) = self.array_index(key) {
            if i < self.array.len() {
                return self.array[i].clone();
            }
            return Value::Nil;
        }
        match TableKey::from_value(key) {
            Some(k) => self
                .hash
                .get(&k)
                .map(|e| e.value.clone())
                .unwrap_or(Value::Nil),
            None => Value::Nil,
        }
    }

    pub fn raw_get_int(&self, i: i64) -> Value {
        if i >= 1 && (i as usize) <= self.array.len() {
            return self.array[i as usize - 1].clone();
        }
        self.hash
            .get(&TableKey::Int(i))
            .map(|e| e.value.clone())
            .unwrap_or(Value::Nil)
    }

    /// Raw assignment. Err on a nil or NaN key with a non-nil value.
    pub fn raw_set(&mut self, key: Value, value: Value) -> Result<(), &'static str> {
        if let Some(i) = self.array_index(&key) {
            if i < self.array.len() {
                self.array[i] = value;
                // Keep the array part dense: drop trailing nils.
                while matches!(self.array.last(), Some(Value::Nil)) {
                    self.array.pop();
                }
            } else if !value.is_nil() {
                // i == array.len(): append, then pull any successors in
                // from the hash part.
                self.array.push(value);
                let mut next = self.array.len() as i64 + 1;
                while let Some(e) = self.hash.remove(&TableKey::Int(next)) {
                    self.array.push(e.value);
                    next += 1;
                }
            }
            return Ok(());
        }
        let k = match TableKey::from_value(&key) {
            Some(k) => k,
            None => {
                if value.is_nil() {
                    return Ok(());
                }
                return Err(if key.is_nil() {
                    "table index is nil"
                } else {
                    "table index is NaN"
                });
            }
        };
        if value.is_nil() {
            self.hash.remove(&k);
        } else {
            self.hash.insert(k, Entry { key, value });
        }
        Ok(())
    }

    pub fn raw_set_int(&mut self, i: i64, value: Value) {
        let _ = self.raw_set(Value::Number(i as f64), value);
    }

    /// The `#` border: the array part is kept dense, so its length is a
    /// valid border unless the hash part continues the sequence.
    pub fn len(&self) -> i64 {
        let mut n = self.array.len() as i64;
        while self.hash.contains_key(&TableKey::Int(n + 1)) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.is_empty()
    }

    /// Stateless iteration for `next`: given the previous key (nil to
    /// start), produce the following key/value pair, or None at the end.
    /// Array entries come first, then hash entries in map order.
    pub fn next_entry(&self, prev: &Value) -> Result<Option<(Value, Value)>, &'static str> {
        if prev.is_nil() {
            for (i, v) in self.array.iter().enumerate() {
                if !v.is_nil() {
                    return Ok(Some((Value::Number(i as f64 + 1.0), v.clone())));
                }
            }
            return Ok(self.first_hash_entry());
        }
        if let Some(i) = self.array_index(prev) {
            if i < self.array.len() {
                for j in i + 1..self.array.len() {
                    if !self.array[j].is_nil() {
                        return Ok(Some((Value::Number(j as f64 + 1.0), self.array[j].clone())));
                    }
                }
                return Ok(self.first_hash_entry());
            }
        }
        let k = TableKey::from_value(prev).ok_or("invalid key to 'next'")?;
        let mut found = false;
        for (key, entry) in self.hash.iter() {
            if found {
                return Ok(Some((entry.key.clone(), entry.value.clone())));
            }
            if *key == k {
                found = true;
            }
        }
        if found {
            return Ok(None);
        }
        Err("invalid key to 'next'")
    }

    fn first_hash_entry(&self) -> Option<(Value, Value)> {
        self.hash
            .values()
            .next()
            .map(|e| (e.key.clone(), e.value.clone()))
    }
}
