use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// 路径片段
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// 结构化值上的路径查询，例如 `choices[0].text`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValuePath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl ValuePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let mut segments = Vec::new();
        let mut field = String::new();
        let mut chars = raw.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if field.is_empty() && !matches!(segments.last(), Some(PathSegment::Index(_))) {
                        return Err(invalid_path(raw));
                    }
                    if !field.is_empty() {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    }
                }
                '[' => {
                    if !field.is_empty() {
                        segments.push(PathSegment::Field(std::mem::take(&mut field)));
                    }
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(d) if d.is_ascii_digit() => digits.push(d),
                            _ => return Err(invalid_path(raw)),
                        }
                    }
                    let index = digits.parse::<usize>().map_err(|_| invalid_path(raw))?;
                    segments.push(PathSegment::Index(index));
                    if let Some(next) = chars.peek() {
                        if *next != '.' && *next != '[' {
                            return Err(invalid_path(raw));
                        }
                    }
                }
                ']' => return Err(invalid_path(raw)),
                other => field.push(other),
            }
        }

        if !field.is_empty() {
            segments.push(PathSegment::Field(field));
        } else if raw.ends_with('.') {
            return Err(invalid_path(raw));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                PathSegment::Field(name) => current.as_object()?.get(name),
                PathSegment::Index(index) => current.as_array()?.get(*index),
            })
    }
}

fn invalid_path(raw: &str) -> FlowError {
    FlowError::Serialization(format!("invalid value path `{raw}`"))
}

impl TryFrom<String> for ValuePath {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self> {
        ValuePath::parse(&value)
    }
}

impl From<ValuePath> for String {
    fn from(path: ValuePath) -> Self {
        path.raw
    }
}

impl fmt::Display for ValuePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.raw)
        }
    }
}

/// 对其它节点结果的引用
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRef {
    pub node: String,
    #[serde(default, skip_serializing_if = "ValuePath::is_root")]
    pub path: ValuePath,
    /// 将字符串结果按 JSON 解析
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub parse_json: bool,
}

impl ValueRef {
    pub fn new(node: impl Into<String>, path: &str) -> Result<Self> {
        Ok(Self {
            node: node.into(),
            path: ValuePath::parse(path)?,
            parse_json: false,
        })
    }

    pub fn node(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            path: ValuePath::root(),
            parse_json: false,
        }
    }

    /// 解析 `node.field[0].sub` 形式的引用，首段为节点 id
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        let split = reference.find(['.', '[']).unwrap_or(reference.len());
        let (node, rest) = reference.split_at(split);
        if node.is_empty() {
            return Err(FlowError::Serialization(format!(
                "reference `{reference}` does not name a node"
            )));
        }
        let rest = rest.strip_prefix('.').unwrap_or(rest);
        Ok(Self {
            node: node.to_string(),
            path: ValuePath::parse(rest)?,
            parse_json: false,
        })
    }

    pub fn as_json(mut self) -> Self {
        self.parse_json = true;
        self
    }

    pub fn lookup_error(&self) -> FlowError {
        FlowError::Lookup {
            node: self.node.clone(),
            path: self.path.to_string(),
        }
    }
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_root() {
            write!(f, "{}", self.node)
        } else if self.path.as_str().starts_with('[') {
            write!(f, "{}{}", self.node, self.path)
        } else {
            write!(f, "{}.{}", self.node, self.path)
        }
    }
}
