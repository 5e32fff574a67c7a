use serde_json::Value;

use crate::error::Result;
use crate::flow::ValueRef;
use crate::state::{ExecutionContext, IterationPath};

/// 渲染 `{{node.path}}` 占位符；字符串原样插入，其它值按 JSON 插入
pub fn render_template(
    template: &str,
    ctx: &ExecutionContext,
    scope: &IterationPath,
) -> Result<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let Some(close) = rest[open + 2..].find("}}") else {
            break;
        };
        rendered.push_str(&rest[..open]);

        let expression = rest[open + 2..open + 2 + close].trim();
        let reference = ValueRef::parse(expression)?;
        match ctx.resolve(&reference, scope)? {
            Value::String(text) => rendered.push_str(&text),
            other => rendered.push_str(&other.to_string()),
        }
        rest = &rest[open + 2 + close + 2..];
    }

    rendered.push_str(rest);
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::flow::{FlowCanvas, FlowNode, NodeKind};
    use crate::runtime::RunRequest;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let canvas = FlowCanvas::new("a", vec![FlowNode::new("a", NodeKind::NoOp)]).unwrap();
        let ctx = ExecutionContext::new("run-t", Arc::new(canvas), RunRequest::default());
        ctx.record("start", &IterationPath::root(), json!({"city": "Hangzhou", "days": 3}))
            .unwrap();
        ctx
    }

    #[test]
    fn substitutes_strings_and_json() {
        let ctx = context();
        let text = render_template(
            "Plan {{ start.days }} days in {{start.city}}",
            &ctx,
            &IterationPath::root(),
        )
        .unwrap();
        assert_eq!(text, "Plan 3 days in Hangzhou");

        let whole = render_template("{{start}}", &ctx, &IterationPath::root()).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&whole).unwrap(),
            json!({"city": "Hangzhou", "days": 3})
        );
    }

    #[test]
    fn unterminated_placeholder_is_literal() {
        let ctx = context();
        let text = render_template("keep {{ this", &ctx, &IterationPath::root()).unwrap();
        assert_eq!(text, "keep {{ this");
    }

    #[test]
    fn missing_reference_is_lookup_error() {
        let ctx = context();
        let err = render_template("{{llm.choices[0].text}}", &ctx, &IterationPath::root())
            .unwrap_err();
        assert!(err.is_lookup());
    }
}
