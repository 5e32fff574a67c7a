use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flow::path::ValueRef;
use crate::state::{ExecutionContext, IterationPath};

/// 自定义判定函数
pub type PredicateFn = Arc<dyn Fn(&ExecutionContext) -> bool + Send + Sync>;

/// 分支条件：`branch_key` 在上下文中的取值等于 `branch_value` 时命中
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchCondition {
    pub branch_key: String,
    pub branch_value: Value,
}

impl BranchCondition {
    pub fn new(branch_key: impl Into<String>, branch_value: impl Into<Value>) -> Self {
        Self {
            branch_key: branch_key.into(),
            branch_value: branch_value.into(),
        }
    }

    pub fn matches(&self, ctx: &ExecutionContext, scope: &IterationPath) -> bool {
        resolve_key(ctx, &self.branch_key, scope)
            .map(|value| value == self.branch_value)
            .unwrap_or(false)
    }
}

/// 上下文谓词，用于循环继续条件
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextPredicate {
    Equals { key: String, value: Value },
    NotEquals { key: String, value: Value },
    Exists { key: String },
    Absent { key: String },
    #[serde(skip)]
    Custom(PredicateFn),
}

impl ContextPredicate {
    pub fn evaluate(&self, ctx: &ExecutionContext, scope: &IterationPath) -> bool {
        match self {
            ContextPredicate::Equals { key, value } => {
                resolve_key(ctx, key, scope).as_ref() == Some(value)
            }
            ContextPredicate::NotEquals { key, value } => {
                resolve_key(ctx, key, scope).as_ref() != Some(value)
            }
            ContextPredicate::Exists { key } => resolve_key(ctx, key, scope).is_some(),
            ContextPredicate::Absent { key } => resolve_key(ctx, key, scope).is_none(),
            ContextPredicate::Custom(func) => func(ctx),
        }
    }

    /// 引用到的键，用于构建期校验
    pub fn key(&self) -> Option<&str> {
        match self {
            ContextPredicate::Equals { key, .. }
            | ContextPredicate::NotEquals { key, .. }
            | ContextPredicate::Exists { key }
            | ContextPredicate::Absent { key } => Some(key),
            ContextPredicate::Custom(_) => None,
        }
    }
}

impl fmt::Debug for ContextPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextPredicate::Equals { key, value } => f
                .debug_struct("Equals")
                .field("key", key)
                .field("value", value)
                .finish(),
            ContextPredicate::NotEquals { key, value } => f
                .debug_struct("NotEquals")
                .field("key", key)
                .field("value", value)
                .finish(),
            ContextPredicate::Exists { key } => f.debug_struct("Exists").field("key", key).finish(),
            ContextPredicate::Absent { key } => f.debug_struct("Absent").field("key", key).finish(),
            ContextPredicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn resolve_key(ctx: &ExecutionContext, key: &str, scope: &IterationPath) -> Option<Value> {
    let reference = ValueRef::parse(key).ok()?;
    ctx.resolve(&reference, scope).ok()
}

pub fn predicate_from_fn<F>(func: F) -> ContextPredicate
where
    F: Fn(&ExecutionContext) -> bool + Send + Sync + 'static,
{
    ContextPredicate::Custom(Arc::new(func))
}

pub fn predicate_equals(key: impl Into<String>, value: impl Into<Value>) -> ContextPredicate {
    ContextPredicate::Equals {
        key: key.into(),
        value: value.into(),
    }
}

pub fn predicate_not_equals(key: impl Into<String>, value: impl Into<Value>) -> ContextPredicate {
    ContextPredicate::NotEquals {
        key: key.into(),
        value: value.into(),
    }
}

pub fn predicate_exists(key: impl Into<String>) -> ContextPredicate {
    ContextPredicate::Exists { key: key.into() }
}

pub fn predicate_absent(key: impl Into<String>) -> ContextPredicate {
    ContextPredicate::Absent { key: key.into() }
}
