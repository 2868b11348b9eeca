use std::collections::HashMap;
use std::sync::Arc;

use super::envelope::Step;
use super::stages::{StageHandler, Stages};

#[derive(Clone)]
pub struct Transition {
    pub handler: Arc<dyn StageHandler>,
    pub next: Option<Step>,
}

/// Step → (handler, successor). A step with no entry cannot be dispatched.
#[derive(Clone, Default)]
pub struct TransitionTable {
    entries: HashMap<Step, Transition>,
}

impl TransitionTable {
    pub fn from_entries(entries: impl IntoIterator<Item = (Step, Arc<dyn StageHandler>, Option<Step>)>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|(step, handler, next)| (step, Transition { handler, next }))
                .collect(),
        }
    }

    /// validate → transcode → segment → checksum → thumbnail → publish.
    pub fn standard(stages: Stages) -> Self {
        Self::from_entries([
            (Step::Validate, stages.validate, Some(Step::Transcode)),
            (Step::Transcode, stages.transcode, Some(Step::Segment)),
            (Step::Segment, stages.segment, Some(Step::Checksum)),
            (Step::Checksum, stages.checksum, Some(Step::Thumbnail)),
            (Step::Thumbnail, stages.thumbnail, Some(Step::Publish)),
            (Step::Publish, stages.publish, None),
        ])
    }

    pub fn get(&self, step: Step) -> Option<&Transition> {
        self.entries.get(&step)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
