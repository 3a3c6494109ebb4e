//! Scripted node kinds for loop tests.
//!
//! Every kind registered by [`test_registry`] records `(node id, input)` in
//! a shared [`Recorder`] before doing its work, so tests can assert on
//! invocation order and on what each node saw.
//!
//! | kind        | behaviour                                              |
//! |-------------|--------------------------------------------------------|
//! | `scripted`  | producer emitting each of `values`, then no work       |
//! | `double`    | `{"v": n}` → `{"v": 2n}`                               |
//! | `increment` | `{"v": n}` → `{"v": n + 1}`                            |
//! | `fail-if`   | fails when `v == equals`, passes through otherwise     |
//! | `panic-if`  | panics when `v == equals`, passes through otherwise    |
//! | `label`     | branches on the fixed `label` param                    |
//! | `parity`    | branches `"even"` / `"odd"` on `v`                     |
//! | `pass`      | passes the input through                               |

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use flowloop::node::{
    Node, NodeBuildError, NodeContext, NodeData, NodeError, NodeOutput, NodeRegistry, from_fn,
};
use serde_json::{Value, json};

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub node: String,
    pub input: NodeData,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<Invocation>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, node: &str, input: &NodeData) {
        self.calls.lock().unwrap().push(Invocation {
            node: node.to_string(),
            input: input.clone(),
        });
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    /// Node ids in invocation order.
    pub fn order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.node).collect()
    }

    /// Inputs seen by one node, in order.
    pub fn inputs_of(&self, node: &str) -> Vec<NodeData> {
        self.calls()
            .into_iter()
            .filter(|c| c.node == node)
            .map(|c| c.input)
            .collect()
    }

    pub fn count(&self, node: &str) -> usize {
        self.calls().iter().filter(|c| c.node == node).count()
    }
}

/// `v` field of an object payload (0 when missing).
pub fn v(data: &NodeData) -> i64 {
    data.get("v").and_then(Value::as_i64).unwrap_or(0)
}

fn param_json(ctx: &NodeContext, key: &str) -> Result<Value, NodeBuildError> {
    let value = ctx
        .params
        .get(key)
        .cloned()
        .ok_or_else(|| NodeBuildError::InvalidParams {
            node: ctx.id.clone(),
            message: format!("missing `{key}`"),
        })?;
    serde_json::to_value(value).map_err(|e| NodeBuildError::InvalidParams {
        node: ctx.id.clone(),
        message: e.to_string(),
    })
}

/// Wrap a transform so every call is recorded first.
fn recorded<F>(recorder: &Recorder, id: &str, mut f: F) -> Box<dyn Node>
where
    F: FnMut(&NodeData) -> Result<NodeOutput, NodeError> + Send + 'static,
{
    let recorder = recorder.clone();
    let id = id.to_string();
    Box::new(from_fn(move |input: &NodeData| {
        recorder.record(&id, input);
        f(input)
    }))
}

/// Built-in kinds plus the scripted test kinds, all reporting to `recorder`.
pub fn test_registry(recorder: &Recorder) -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();

    let r = recorder.clone();
    registry.register("scripted", move |ctx| {
        let values = match param_json(ctx, "values")? {
            Value::Array(items) => items,
            other => vec![other],
        };
        let mut pending: VecDeque<Value> = values.into();
        Ok(recorded(&r, &ctx.id, move |_| {
            Ok(match pending.pop_front() {
                Some(payload) => NodeOutput::Data(NodeData::new(payload)),
                None => NodeOutput::NoWork,
            })
        }))
    });

    let r = recorder.clone();
    registry.register("double", move |ctx| {
        Ok(recorded(&r, &ctx.id, |d| {
            Ok(NodeOutput::Data(d.with_payload(json!({ "v": v(d) * 2 }))))
        }))
    });

    let r = recorder.clone();
    registry.register("increment", move |ctx| {
        Ok(recorded(&r, &ctx.id, |d| {
            Ok(NodeOutput::Data(d.with_payload(json!({ "v": v(d) + 1 }))))
        }))
    });

    let r = recorder.clone();
    registry.register("fail-if", move |ctx| {
        let equals = param_json(ctx, "equals")?.as_i64().unwrap_or(0);
        Ok(recorded(&r, &ctx.id, move |d| {
            if v(d) == equals {
                Err(NodeError::failed(format!("refusing v = {equals}")))
            } else {
                Ok(NodeOutput::Data(d.clone()))
            }
        }))
    });

    let r = recorder.clone();
    registry.register("panic-if", move |ctx| {
        let equals = param_json(ctx, "equals")?.as_i64().unwrap_or(0);
        Ok(recorded(&r, &ctx.id, move |d| {
            if v(d) == equals {
                panic!("node cannot handle v = {equals}");
            }
            Ok(NodeOutput::Data(d.clone()))
        }))
    });

    let r = recorder.clone();
    registry.register("label", move |ctx| {
        let label = param_json(ctx, "label")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(recorded(&r, &ctx.id, move |d| {
            Ok(NodeOutput::branch(d.clone(), label.clone()))
        }))
    });

    let r = recorder.clone();
    registry.register("parity", move |ctx| {
        Ok(recorded(&r, &ctx.id, |d| {
            let label = if v(d) % 2 == 0 { "even" } else { "odd" };
            Ok(NodeOutput::branch(d.clone(), label))
        }))
    });

    let r = recorder.clone();
    registry.register("pass", move |ctx| {
        Ok(recorded(&r, &ctx.id, |d| Ok(NodeOutput::Data(d.clone()))))
    });

    registry
}
