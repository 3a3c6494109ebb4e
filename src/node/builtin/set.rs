// src/node/builtin/set.rs

//! Merges fixed values into the payload object.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::node::{
    Node, NodeBuildError, NodeContext, NodeData, NodeError, NodeFuture, NodeOutput, NodeVariant,
};

pub const KIND: &str = "set";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    values: toml::Table,
}

#[derive(Debug, Clone)]
pub struct SetNode {
    values: Map<String, Value>,
}

impl SetNode {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    fn apply(&self, input: &NodeData) -> Result<NodeData, NodeError> {
        let mut payload = match &input.payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(NodeError::InvalidData(format!(
                    "set expects an object payload, got {other}"
                )));
            }
        };
        for (k, v) in &self.values {
            payload.insert(k.clone(), v.clone());
        }
        Ok(input.with_payload(Value::Object(payload)))
    }
}

pub(super) fn build(ctx: &NodeContext) -> Result<Box<dyn Node>, NodeBuildError> {
    ctx.require_variant(KIND, &[NodeVariant::Blocking, NodeVariant::NonBlocking])?;
    let params: Params = ctx.params()?;

    let values = match serde_json::to_value(params.values) {
        Ok(Value::Object(map)) => map,
        Ok(_) => Map::new(),
        Err(e) => {
            return Err(NodeBuildError::InvalidParams {
                node: ctx.id.clone(),
                message: e.to_string(),
            });
        }
    };

    Ok(Box::new(SetNode::new(values)))
}

impl Node for SetNode {
    fn execute<'a>(&'a mut self, input: &'a NodeData) -> NodeFuture<'a> {
        let result = self.apply(input).map(NodeOutput::Data);
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node() -> SetNode {
        let mut values = Map::new();
        values.insert("status".into(), json!("done"));
        values.insert("v".into(), json!(0));
        SetNode::new(values)
    }

    #[tokio::test]
    async fn merges_values_over_payload() {
        let mut n = node();
        let input = NodeData::new(json!({"v": 3, "id": "a"}));
        let out = n.execute(&input).await.unwrap();
        assert_eq!(
            out,
            NodeOutput::Data(NodeData::new(json!({"v": 0, "id": "a", "status": "done"})))
        );
        assert_eq!(input.payload, json!({"v": 3, "id": "a"}));
    }

    #[tokio::test]
    async fn scalar_payload_is_invalid() {
        let mut n = node();
        let err = n.execute(&NodeData::new(json!(7))).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidData(_)));
    }
}
