//! The agent tree a turn runs: a router that hands off to one worker.

use std::sync::Arc;

use hirewire_core::domain::model::{ModelNode, ModelSelection};

use crate::runner::AgentSpec;
use crate::tools::Tool;

pub const ROUTER: &str = "router";
pub const JOB_SEARCH: &str = "job_search";
pub const CRM: &str = "crm";
pub const GENERAL: &str = "general";

const ROUTER_INSTRUCTIONS: &str = "You route career-assistant requests. \
Transfer to `job_search` for finding or filtering job openings, to `crm` for \
questions about contacts, companies or deals the user tracks, and to `general` \
for everything else. Do not answer the user yourself.";

const JOB_SEARCH_INSTRUCTIONS: &str = "You find job openings for the user. \
Call `search_jobs` with a focused query (role, seniority, location). Report \
each listing as company, title and link. Never invent listings. If the search \
limit is reached, summarize what you already found.";

const CRM_INSTRUCTIONS: &str = "You answer questions about the user's CRM \
records. Call `crm_lookup` before answering and only cite records it returns. \
Say plainly when nothing matches.";

const GENERAL_INSTRUCTIONS: &str = "You are a concise, accurate career \
assistant. Answer directly and ask a clarifying question only when the \
request is genuinely ambiguous.";

/// Tools available to the workers for one turn.
pub struct TurnTools {
    pub job_search: Arc<dyn Tool>,
    pub crm_lookup: Arc<dyn Tool>,
}

pub fn build_router(models: &ModelSelection, tools: TurnTools) -> AgentSpec {
    let job_search =
        AgentSpec::new(JOB_SEARCH, JOB_SEARCH_INSTRUCTIONS, models.model_for(ModelNode::JobSearch))
            .with_tool(tools.job_search);
    let crm = AgentSpec::new(CRM, CRM_INSTRUCTIONS, models.model_for(ModelNode::Crm))
        .with_tool(tools.crm_lookup);
    let general =
        AgentSpec::new(GENERAL, GENERAL_INSTRUCTIONS, models.model_for(ModelNode::General));

    AgentSpec::new(ROUTER, ROUTER_INSTRUCTIONS, models.model_for(ModelNode::Router))
        .with_handoff(job_search)
        .with_handoff(crm)
        .with_handoff(general)
}
