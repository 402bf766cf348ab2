//! N-gram transition model built from a record store snapshot.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::ModelShapeError;
use crate::schema::Record;
use crate::store::RecordStore;

/// The last `state_size` tokens of a walk.
pub type State = Vec<String>;

/// One candidate next token for a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Successor {
    pub token: String,
    /// Number of times the transition occurs in the corpus.
    pub weight: u32,
    /// Indices into [`ChainModel::records`] of every record containing the
    /// transition.
    pub sources: BTreeSet<usize>,
}

impl Successor {
    fn first(token: String, source: usize) -> Self {
        Self {
            token,
            weight: 1,
            sources: BTreeSet::from([source]),
        }
    }
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

/// Immutable transition table.
///
/// The model embeds the record snapshot it was built from so attribution and
/// attachment lookups stay consistent with the transitions even when the
/// persisted store has moved on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainModel {
    state_size: usize,
    records: Vec<Record>,
    transitions: HashMap<State, Vec<Successor>>,
    starts: Vec<State>,
}

impl ChainModel {
    /// Build the table from every record in `store`.  Windows never cross a
    /// record boundary; records shorter than `state_size + 1` tokens add no
    /// transitions but are kept for attachment lookups.
    pub fn build(store: &RecordStore, state_size: usize) -> Self {
        let state_size = state_size.max(1);
        let records = store.all().to_vec();
        let mut transitions: HashMap<State, Vec<Successor>> = HashMap::new();
        let mut starts = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let tokens = tokenize(&record.text);
            if tokens.len() <= state_size {
                continue;
            }

            starts.push(tokens[..state_size].to_vec());
            for window in tokens.windows(state_size + 1) {
                let (state, next) = window.split_at(state_size);
                let next = &next[0];
                let successors = transitions.entry(state.to_vec()).or_default();
                match successors.iter_mut().find(|s| &s.token == next) {
                    Some(existing) => {
                        existing.weight += 1;
                        existing.sources.insert(index);
                    }
                    None => successors.push(Successor::first(next.clone(), index)),
                }
            }
        }

        Self {
            state_size,
            records,
            transitions,
            starts,
        }
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Opening window of every record long enough to produce a transition,
    /// repeated once per record.
    pub fn starts(&self) -> &[State] {
        &self.starts
    }

    pub fn successors(&self, state: &[String]) -> &[Successor] {
        self.transitions
            .get(state)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// How many times `state` occurs in the corpus followed by another token.
    pub fn attestation(&self, state: &[String]) -> u64 {
        self.successors(state)
            .iter()
            .map(|s| u64::from(s.weight))
            .sum()
    }

    pub fn state_count(&self) -> usize {
        self.transitions.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.values().map(Vec::len).sum()
    }

    /// True when no record produced a transition.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn to_file(&self) -> ModelFile {
        let mut transitions: Vec<TransitionEntry> = self
            .transitions
            .iter()
            .map(|(state, successors)| TransitionEntry {
                state: state.clone(),
                successors: successors.clone(),
            })
            .collect();
        transitions.sort_by(|left, right| left.state.cmp(&right.state));

        ModelFile {
            state_size: self.state_size,
            records: self.records.clone(),
            starts: self.starts.clone(),
            transitions,
        }
    }
}

// ── Serialized form ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionEntry {
    pub state: State,
    pub successors: Vec<Successor>,
}

/// On-disk layout of a [`ChainModel`].  Transitions are sorted by state so
/// rebuilding an unchanged store rewrites an identical file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    pub state_size: usize,
    pub records: Vec<Record>,
    pub starts: Vec<State>,
    pub transitions: Vec<TransitionEntry>,
}

impl TryFrom<ModelFile> for ChainModel {
    type Error = ModelShapeError;

    fn try_from(file: ModelFile) -> Result<Self, Self::Error> {
        if file.state_size == 0 {
            return Err(ModelShapeError::ZeroStateSize);
        }

        let check_state = |state: &State| {
            if state.len() == file.state_size {
                Ok(())
            } else {
                Err(ModelShapeError::StateLength {
                    expected: file.state_size,
                    found: state.len(),
                })
            }
        };

        for start in &file.starts {
            check_state(start)?;
        }

        let mut transitions = HashMap::with_capacity(file.transitions.len());
        for entry in file.transitions {
            check_state(&entry.state)?;
            for successor in &entry.successors {
                if let Some(&index) = successor.sources.iter().find(|&&i| i >= file.records.len()) {
                    return Err(ModelShapeError::DanglingSource {
                        index,
                        records: file.records.len(),
                    });
                }
            }
            transitions.insert(entry.state, entry.successors);
        }

        Ok(Self {
            state_size: file.state_size,
            records: file.records,
            transitions,
            starts: file.starts,
        })
    }
}
