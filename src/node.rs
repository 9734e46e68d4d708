//! Host-node surface: one operation that renders the text report.
//!
//! A workflow host discovers the node through [`NodeDescriptor`] (serialised
//! to JSON) and calls [`PerformanceStatsNode::get_stats`].

use crate::config::MAX_SAMPLE_MS;
use crate::probe::CapabilitySource;
use crate::report::assemble_report;
use serde::Serialize;
use std::sync::Arc;

pub const NODE_ID: &str = "PerformanceStats";
pub const DISPLAY_NAME: &str = "Performance Stats (CPU/GPU)";
pub const CATEGORY: &str = "utils/monitoring";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IntInput {
    pub default: i64,
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

impl IntInput {
    pub fn clamp(&self, value: i64) -> i64 {
        value.clamp(self.min, self.max)
    }
}

pub const SAMPLE_INTERVAL_INPUT: IntInput = IntInput {
    default: 100,
    min: 0,
    max: MAX_SAMPLE_MS as i64,
    step: 50,
};

#[derive(Debug, Clone, Serialize)]
pub struct NodeDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub function: &'static str,
    pub inputs: Vec<(&'static str, IntInput)>,
    pub outputs: Vec<&'static str>,
}

pub struct PerformanceStatsNode {
    caps: Arc<dyn CapabilitySource>,
}

impl PerformanceStatsNode {
    pub fn new(caps: Arc<dyn CapabilitySource>) -> Self {
        Self { caps }
    }

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor {
            id: NODE_ID,
            display_name: DISPLAY_NAME,
            category: CATEGORY,
            function: "get_stats",
            inputs: vec![("sample_interval_ms", SAMPLE_INTERVAL_INPUT)],
            outputs: vec!["stats"],
        }
    }

    /// Out-of-range intervals are clamped to the declared input range.
    pub fn get_stats(&self, sample_interval_ms: Option<i64>) -> String {
        let interval = SAMPLE_INTERVAL_INPUT
            .clamp(sample_interval_ms.unwrap_or(SAMPLE_INTERVAL_INPUT.default));
        assemble_report(self.caps.as_ref(), interval)
    }
}
