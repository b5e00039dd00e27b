use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::hooks::format_seconds;
use crate::message::Message;
use crate::node::{NodeContext, NodeErr, NodeOut, NodeType, OutputSlot};

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionTimeInputs {}

/// Reports how long the current run has taken so far, as `"{:.2}s"`.
/// Per-node and total timings are logged by the timing hook.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTime;

#[async_trait]
#[typetag::serde]
impl NodeType for ExecutionTime {
    fn type_name(&self) -> String {
        "ExecutionTime".to_string()
    }

    fn display_name(&self) -> String {
        "Execution Time".to_string()
    }

    fn category(&self) -> &'static str {
        "DW-Utils/Debug"
    }

    fn schema(&self) -> schemars::Schema {
        schemars::schema_for!(ExecutionTimeInputs)
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::text("execution_time")]
    }

    #[tracing::instrument(name = "execution_time_node_process", skip(self, context))]
    async fn process(&mut self, _input: Message, context: &mut NodeContext) -> Result<NodeOut, NodeErr> {
        Ok(NodeOut::text(format_seconds(context.run_elapsed())))
    }

    fn clone_box(&self) -> Box<dyn NodeType> {
        Box::new(self.clone())
    }
}
