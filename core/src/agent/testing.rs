//! Scripted fakes for exercising the loop without a network or real tools.

use crate::traits::{
    AssistantTurn, CompletionRequest, Provider, ToolDescriptor, ToolOutput, ToolRegistryAdapter,
};
use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

pub enum Script {
    Reply(AssistantTurn),
    Fail(String),
    Delayed(Duration, AssistantTurn),
}

type Generator = Box<dyn Fn(u32) -> AssistantTurn + Send + Sync>;

/// Pops one scripted step per `complete` call.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Script>>,
    generator: Option<Generator>,
    calls: AtomicU32,
    completed: AtomicU32,
    offered: Mutex<Vec<Vec<String>>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Script>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            generator: None,
            calls: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            offered: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `generator(call_number)`, starting at 1.
    pub fn repeating(generator: impl Fn(u32) -> AssistantTurn + Send + Sync + 'static) -> Self {
        Self {
            generator: Some(Box::new(generator)),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that ran to completion, including delayed ones.
    pub fn completed_calls(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn offered_tools(&self, call: usize) -> Vec<String> {
        self.offered.lock().unwrap()[call].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest<'_>) -> anyhow::Result<AssistantTurn> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.offered
            .lock()
            .unwrap()
            .push(request.tools.iter().map(|t| t.name.clone()).collect());

        if let Some(generator) = &self.generator {
            self.completed.fetch_add(1, Ordering::SeqCst);
            return Ok(generator(n));
        }

        let step = self.script.lock().unwrap().pop_front();
        let turn = match step {
            Some(Script::Reply(turn)) => turn,
            Some(Script::Fail(reason)) => return Err(anyhow::anyhow!(reason)),
            Some(Script::Delayed(delay, turn)) => {
                tokio::time::sleep(delay).await;
                turn
            }
            None => return Err(anyhow::anyhow!("script exhausted")),
        };
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(turn)
    }
}

/// Registry that records every execution and returns canned outputs.
pub struct RecordingRegistry {
    names: Vec<String>,
    outputs: HashMap<String, ToolOutput>,
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    executed: Mutex<Vec<String>>,
    finished: AtomicUsize,
    list_calls: AtomicUsize,
}

impl RecordingRegistry {
    pub fn new(names: &[&str]) -> Self {
        Self {
            names: names.iter().map(|s| s.to_string()).collect(),
            outputs: HashMap::new(),
            failing: HashSet::new(),
            delays: HashMap::new(),
            executed: Mutex::new(Vec::new()),
            finished: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_output(mut self, name: &str, output: ToolOutput) -> Self {
        self.outputs.insert(name.to_string(), output);
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    /// Sleeps for `delay` before answering calls to `name`.
    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_string(), delay);
        self
    }

    /// Executions that ran to completion, including delayed ones.
    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolRegistryAdapter for RecordingRegistry {
    fn list_descriptors(&self, names: &BTreeSet<String>) -> Vec<ToolDescriptor> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.names
            .iter()
            .filter(|n| names.contains(*n))
            .map(|n| ToolDescriptor {
                name: n.clone(),
                description: format!("{n} tool"),
                parameters_schema: json!({"type": "object"}),
            })
            .collect()
    }

    async fn execute(
        &self,
        name: &str,
        _arguments: serde_json::Value,
    ) -> anyhow::Result<ToolOutput> {
        self.executed.lock().unwrap().push(name.to_string());
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(name) {
            return Err(anyhow::anyhow!("registry offline"));
        }
        Ok(self
            .outputs
            .get(name)
            .cloned()
            .unwrap_or_else(|| ToolOutput::success("ok")))
    }
}
