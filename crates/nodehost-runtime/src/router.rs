//! Controller command dispatch.
//!
//! Commands arrive as JSON objects with a `command` field, e.g.
//! `{"command": "load_node", "package_id": "weather"}`. Replies are
//! `{"status": "ok", ...}` or
//! `{"status": "error", "error": {"code": "...", "message": "..."}}`.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use nodehost_core::PackageId;
use nodehost_process::Message;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::controller::NodeController;
use crate::error::{ControllerError, ControllerResult};

type CommandFuture<'a> = BoxFuture<'a, ControllerResult<Value>>;
type CommandHandler = for<'a> fn(&'a NodeController, &'a Message) -> CommandFuture<'a>;

/// Command name to handler.
pub(crate) struct CommandRouter {
    handlers: BTreeMap<&'static str, CommandHandler>,
}

impl CommandRouter {
    pub(crate) fn standard() -> Self {
        let mut handlers: BTreeMap<&'static str, CommandHandler> = BTreeMap::new();
        handlers.insert("load_node", load_node);
        handlers.insert("unload_node", unload_node);
        handlers.insert("list_nodes", list_nodes);
        handlers.insert("node_status", node_status);
        Self { handlers }
    }

    pub(crate) async fn dispatch(&self, controller: &NodeController, message: &Message) -> Message {
        match self.route(controller, message).await {
            Ok(body) => ok_reply(body),
            Err(e) => {
                debug!(error = %e, "Command failed");
                error_reply(&e)
            },
        }
    }

    async fn route(&self, controller: &NodeController, message: &Message) -> ControllerResult<Value> {
        let command = message
            .get("command")
            .and_then(Value::as_str)
            .ok_or_else(|| ControllerError::InvalidCommand("missing 'command' field".into()))?;
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| ControllerError::UnknownCommand(command.to_string()))?;
        handler(controller, message).await
    }
}

fn ok_reply(body: Value) -> Value {
    let mut reply = Map::new();
    reply.insert("status".into(), Value::from("ok"));
    if let Value::Object(fields) = body {
        reply.extend(fields);
    }
    Value::Object(reply)
}

fn error_reply(error: &ControllerError) -> Value {
    json!({
        "status": "error",
        "error": {
            "code": error.kind().as_str(),
            "message": error.to_string(),
        }
    })
}

fn package_arg(message: &Message) -> ControllerResult<PackageId> {
    let raw = message
        .get("package_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ControllerError::InvalidCommand("missing 'package_id' field".into()))?;
    PackageId::lookup(raw).map_err(|e| ControllerError::InvalidCommand(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: &T) -> ControllerResult<Value> {
    serde_json::to_value(value).map_err(|e| ControllerError::InvalidCommand(e.to_string()))
}

fn load_node<'a>(controller: &'a NodeController, message: &'a Message) -> CommandFuture<'a> {
    Box::pin(async move {
        let package_id = package_arg(message)?;
        let instance_id = controller.load_node(&package_id).await?;
        Ok(json!({ "package_id": package_id.id(), "instance_id": instance_id }))
    })
}

fn unload_node<'a>(controller: &'a NodeController, message: &'a Message) -> CommandFuture<'a> {
    Box::pin(async move {
        let package_id = package_arg(message)?;
        let outcomes = controller.unload_node(&package_id).await?;
        Ok(json!({ "unloaded": to_value(&outcomes)? }))
    })
}

fn list_nodes<'a>(controller: &'a NodeController, _message: &'a Message) -> CommandFuture<'a> {
    Box::pin(async move {
        Ok(json!({
            "flags": to_value(&controller.flags())?,
            "nodes": to_value(&controller.list_nodes())?,
        }))
    })
}

fn node_status<'a>(controller: &'a NodeController, message: &'a Message) -> CommandFuture<'a> {
    Box::pin(async move {
        let package_id = package_arg(message)?;
        let statuses = controller.node_status(&package_id)?;
        Ok(json!({ "nodes": to_value(&statuses)? }))
    })
}
