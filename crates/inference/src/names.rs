use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum NameTableError {
    #[error("class-name table is empty")]
    Empty,
    #[error("unrecognized class-name table syntax at byte {position}: {reason}")]
    Syntax { position: usize, reason: &'static str },
}

/// Class-id to class-name lookup.
///
/// Exports disagree on the representation: some ship an ordered list, others
/// a (possibly sparse) id-keyed mapping. Lookup is identical for both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ClassNameTable {
    Sequence(Vec<String>),
    Mapping(BTreeMap<u32, String>),
}

impl ClassNameTable {
    pub fn get(&self, class_id: usize) -> Option<&str> {
        match self {
            ClassNameTable::Sequence(names) => names.get(class_id).map(String::as_str),
            ClassNameTable::Mapping(names) => u32::try_from(class_id)
                .ok()
                .and_then(|id| names.get(&id))
                .map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ClassNameTable::Sequence(names) => names.len(),
            ClassNameTable::Mapping(names) => names.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of class slots a model output must carry for this table:
    /// the list length, or the highest mapped id plus one.
    pub fn class_count(&self) -> usize {
        match self {
            ClassNameTable::Sequence(names) => names.len(),
            ClassNameTable::Mapping(names) => names
                .keys()
                .next_back()
                .map_or(0, |max_id| *max_id as usize + 1),
        }
    }

    /// Parse a table from a JSON list, a JSON object keyed by id, or a
    /// Python dict literal such as `{0: 'person', 1: 'car'}`.
    pub fn parse(raw: &str) -> Result<Self, NameTableError> {
        let raw = raw.trim();

        let table = if let Ok(names) = serde_json::from_str::<Vec<String>>(raw) {
            ClassNameTable::Sequence(names)
        } else if let Ok(names) = serde_json::from_str::<BTreeMap<u32, String>>(raw) {
            ClassNameTable::Mapping(names)
        } else {
            ClassNameTable::Mapping(parse_python_dict(raw)?)
        };

        if table.is_empty() {
            return Err(NameTableError::Empty);
        }
        Ok(table)
    }

    /// One name per non-blank line, in id order.
    pub fn from_lines(text: &str) -> Result<Self, NameTableError> {
        let names: Vec<String> = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if names.is_empty() {
            return Err(NameTableError::Empty);
        }
        Ok(ClassNameTable::Sequence(names))
    }
}

fn parse_python_dict(raw: &str) -> Result<BTreeMap<u32, String>, NameTableError> {
    let syntax = |position, reason| NameTableError::Syntax { position, reason };

    let bytes = raw.as_bytes();
    if bytes.first() != Some(&b'{') || bytes.last() != Some(&b'}') {
        return Err(syntax(0, "expected a braced dict"));
    }

    let mut names = BTreeMap::new();
    let mut chars = raw[1..raw.len() - 1].char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace() || *c == ',').is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };

        let mut key = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| c.is_ascii_digit()) {
            key.push(c);
        }
        let id: u32 = key.parse().map_err(|_| syntax(start + 1, "expected integer key"))?;

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        if chars.next().map(|(_, c)| c) != Some(':') {
            return Err(syntax(start + 1, "expected ':' after key"));
        }
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let quote = match chars.next() {
            Some((_, q @ ('\'' | '"'))) => q,
            _ => return Err(syntax(start + 1, "expected quoted name")),
        };

        let mut name = String::new();
        let mut closed = false;
        while let Some((_, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        name.push(escaped);
                    }
                }
                c if c == quote => {
                    closed = true;
                    break;
                }
                c => name.push(c),
            }
        }
        if !closed {
            return Err(syntax(start + 1, "unterminated name"));
        }

        names.insert(id, name);
    }

    Ok(names)
}
