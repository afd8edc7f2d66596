//! Tool dispatch: ordering, parallelism and timeout rules.
//!
//! File-mutating and exec tools run serialized in model-emission order;
//! read-only tools run concurrently up to the parallelism ceiling; browser
//! tools join the serial queue because they share one headful session.
//! Completions flow back through a fan-in channel, so results are emitted
//! in completion order for the parallel set and in emission order for the
//! serial set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::tools::{validate_args, BoundTool, ToolCategory, ToolError, ToolInvocation};

/// A tool call whose arguments parsed as JSON, ready to run.
#[derive(Clone, Debug)]
pub struct PreparedCall {
    pub index: u32,
    pub id: String,
    pub name: String,
    pub arguments: Value,
    pub raw_arguments: String,
}

/// Outcome of one dispatched call.
#[derive(Clone, Debug)]
pub struct ToolCompletion {
    pub call: PreparedCall,
    pub result: String,
    pub success: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolClass {
    Read,
    Mutating,
    Exec,
    Transfer,
    Browser,
}

const MUTATING_TOOLS: [&str; 6] = [
    "fs_write",
    "fs_patch",
    "fs_remove",
    "fs_rename",
    "fs_copy",
    "asset_fs_write",
];

pub fn classify(tool: &BoundTool) -> ToolClass {
    let def = tool.tool.definition();
    if def.category == ToolCategory::Browser {
        return ToolClass::Browser;
    }
    if def.category == ToolCategory::Transfer {
        return ToolClass::Transfer;
    }
    let id = def.id;
    if MUTATING_TOOLS.contains(&id) {
        return ToolClass::Mutating;
    }
    if id.starts_with("exec_") || id == "asset_exec" {
        return ToolClass::Exec;
    }
    ToolClass::Read
}

/// Short ceiling for reads, long for execution and transfers.
pub fn timeout_for(class: ToolClass) -> Duration {
    match class {
        ToolClass::Read => Duration::from_secs(30),
        ToolClass::Mutating => Duration::from_secs(60),
        ToolClass::Exec | ToolClass::Transfer => Duration::from_secs(600),
        ToolClass::Browser => Duration::from_secs(120),
    }
}

fn serialized(class: ToolClass) -> bool {
    matches!(
        class,
        ToolClass::Mutating | ToolClass::Exec | ToolClass::Browser
    )
}

async fn run_one(
    tool: Option<BoundTool>,
    call: PreparedCall,
    base: ToolInvocation,
    cancel: CancellationToken,
) -> ToolCompletion {
    let Some(tool) = tool else {
        return ToolCompletion {
            result: format!("unknown tool: {}", call.name),
            success: false,
            call,
        };
    };
    let def = tool.tool.definition();
    if let Err(violation) = validate_args(&def.parameters, &call.arguments) {
        return ToolCompletion {
            result: format!("invalid arguments: {}", violation),
            success: false,
            call,
        };
    }
    let class = classify(&tool);
    let timeout = timeout_for(class);
    let invocation = ToolInvocation {
        workspace: base.workspace.clone(),
        options: tool.options.clone(),
        cancel: cancel.clone(),
    };
    let invoke = tool.tool.invoke(call.arguments.clone(), &invocation);
    let outcome = tokio::select! {
        outcome = tokio::time::timeout(timeout, invoke) => {
            match outcome {
                Ok(result) => result,
                Err(_) => Err(ToolError::Timeout),
            }
        }
        _ = cancel.cancelled() => Err(ToolError::Cancelled),
    };
    match outcome {
        Ok(result) => ToolCompletion {
            call,
            result,
            success: true,
        },
        Err(e) => ToolCompletion {
            result: e.to_string(),
            success: false,
            call,
        },
    }
}

/// Dispatches one turn's calls. Returns a receiver that yields exactly one
/// completion per call and then closes.
pub fn dispatch(
    calls: Vec<PreparedCall>,
    tools: &[BoundTool],
    base: ToolInvocation,
    parallel_limit: usize,
    cancel: CancellationToken,
) -> mpsc::Receiver<ToolCompletion> {
    let (tx, rx) = mpsc::channel(calls.len().max(1));
    let by_id: HashMap<String, BoundTool> = tools
        .iter()
        .map(|t| (t.id().to_string(), t.clone()))
        .collect();

    let semaphore = Arc::new(Semaphore::new(parallel_limit.max(1)));
    let mut serial_queue = Vec::new();
    for call in calls {
        let tool = by_id.get(&call.name).cloned();
        let class = tool.as_ref().map(classify).unwrap_or(ToolClass::Read);
        if serialized(class) {
            serial_queue.push((tool, call));
        } else {
            let tx = tx.clone();
            let base = base.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                let completion = run_one(tool, call, base, cancel).await;
                let _ = tx.send(completion).await;
            });
        }
    }
    if !serial_queue.is_empty() {
        let tx = tx.clone();
        let base = base.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            for (tool, call) in serial_queue {
                if cancel.is_cancelled() {
                    let _ = tx
                        .send(ToolCompletion {
                            result: "tool cancelled".into(),
                            success: false,
                            call,
                        })
                        .await;
                    continue;
                }
                let completion = run_one(tool, call, base.clone(), cancel.clone()).await;
                let _ = tx.send(completion).await;
            }
        });
    }
    drop(tx);
    rx
}
