//! Random walks over a [`ChainModel`], scoring, and attribution.
//!
//! Score of a token sequence: for every window of `state_size` consecutive
//! tokens, add how many times that window occurs in the corpus followed by
//! another token ([`ChainModel::attestation`]), and sum.  The score is
//! deterministic for a given sequence and model, and rises with both the
//! number of windows and how heavily each one is attested.

use std::collections::BTreeSet;

use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use markbot_config::CorpusConfig;

use crate::chain::{ChainModel, Successor};
use crate::error::CorpusError;
use crate::schema::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    pub min_score: u64,
    pub max_tries: usize,
    /// Longest walk allowed, counted in tokens including the start state.
    pub max_tokens: usize,
}

impl From<&CorpusConfig> for GenerateOptions {
    fn from(config: &CorpusConfig) -> Self {
        Self {
            min_score: config.min_score,
            max_tries: config.max_tries,
            max_tokens: config.max_tokens,
        }
    }
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self::from(&CorpusConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub text: String,
    pub score: u64,
    /// Attempt number (1-based) that produced this sentence.
    pub tries: usize,
    /// Records whose transitions were used along the walk.
    pub refs: Vec<Record>,
}

struct Walk {
    tokens: Vec<String>,
    sources: BTreeSet<usize>,
}

/// Sample sentences until one scores at least `options.min_score`.
///
/// Exactly `options.max_tries` walks are attempted before giving up with
/// [`CorpusError::CorpusInsufficient`].
pub fn generate<R: Rng>(
    model: &ChainModel,
    options: GenerateOptions,
    rng: &mut R,
) -> Result<GenerationResult, CorpusError> {
    let mut attempts = 0;
    while attempts < options.max_tries {
        attempts += 1;
        let Some(walk) = random_walk(model, options.max_tokens, rng) else {
            continue;
        };

        let score = score(model, &walk.tokens);
        debug!(attempt = attempts, score, tokens = walk.tokens.len(), "sampled candidate sentence");
        if score < options.min_score {
            continue;
        }

        let refs = walk
            .sources
            .iter()
            .filter_map(|&index| model.records().get(index).cloned())
            .collect();
        return Ok(GenerationResult {
            text: walk.tokens.join(" "),
            score,
            tries: attempts,
            refs,
        });
    }

    Err(CorpusError::CorpusInsufficient {
        tries: attempts,
        min_score: options.min_score,
    })
}

pub fn score(model: &ChainModel, tokens: &[String]) -> u64 {
    let k = model.state_size();
    if k == 0 || tokens.len() < k {
        return 0;
    }
    tokens.windows(k).map(|window| model.attestation(window)).sum()
}

fn random_walk<R: Rng>(model: &ChainModel, max_tokens: usize, rng: &mut R) -> Option<Walk> {
    let starts = model.starts();
    if starts.is_empty() {
        return None;
    }

    let k = model.state_size();
    let mut tokens = starts[rng.random_range(0..starts.len())].clone();
    let mut sources = BTreeSet::new();

    while tokens.len() < max_tokens {
        let state = &tokens[tokens.len() - k..];
        let Some(next) = pick_successor(model.successors(state), rng) else {
            break;
        };
        sources.extend(next.sources.iter().copied());
        tokens.push(next.token.clone());
    }

    Some(Walk { tokens, sources })
}

fn pick_successor<'a, R: Rng>(successors: &'a [Successor], rng: &mut R) -> Option<&'a Successor> {
    if successors.is_empty() {
        return None;
    }
    let dist = WeightedIndex::new(successors.iter().map(|s| s.weight)).ok()?;
    successors.get(dist.sample(rng))
}

// ── Attachments ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentOrigin {
    /// Drawn from a record that contributed to the sentence.
    Attributed,
    /// No contributing record had media; drawn from the whole store instead.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub uri: String,
    pub origin: AttachmentOrigin,
}

/// Pick media to send alongside `result`.
///
/// Attachments of attributed records are preferred.  When there are none,
/// any record of `store` carrying media is used, so a reply gets media
/// whenever the corpus has some.
pub fn resolve_attachment<R: Rng>(
    result: &GenerationResult,
    store: &[Record],
    rng: &mut R,
) -> Option<ResolvedAttachment> {
    let attributed: Vec<&str> = result
        .refs
        .iter()
        .filter_map(|record| record.attachment.as_deref())
        .collect();

    if !attributed.is_empty() {
        let uri = attributed[rng.random_range(0..attributed.len())];
        return Some(ResolvedAttachment {
            uri: uri.to_string(),
            origin: AttachmentOrigin::Attributed,
        });
    }

    fallback_attachment(store, rng).map(|uri| ResolvedAttachment {
        uri,
        origin: AttachmentOrigin::Fallback,
    })
}

fn fallback_attachment<R: Rng>(store: &[Record], rng: &mut R) -> Option<String> {
    let with_media: Vec<&str> = store
        .iter()
        .filter_map(|record| record.attachment.as_deref())
        .collect();
    if with_media.is_empty() {
        return None;
    }
    Some(with_media[rng.random_range(0..with_media.len())].to_string())
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    use super::{AttachmentOrigin, GenerateOptions, GenerationResult, generate, resolve_attachment, score};
    use crate::chain::{ChainModel, tokenize};
    use crate::error::CorpusError;
    use crate::schema::Record;
    use crate::store::RecordStore;

    fn options(min_score: u64, max_tries: usize) -> GenerateOptions {
        GenerateOptions {
            min_score,
            max_tries,
            max_tokens: 32,
        }
    }

    fn chatter() -> RecordStore {
        RecordStore::from_records([
            Record::new("1", "i like green tea in the morning"),
            Record::new("2", "i like green apples"),
            Record::new("3", "you like green tea too").with_attachment("https://cdn/tea.png"),
            Record::new("4", "short"),
        ])
    }

    #[test]
    fn generated_sentence_is_attributed_to_contributing_records() {
        let model = ChainModel::build(&chatter(), 2);
        let mut rng = StdRng::seed_from_u64(7);
        let result = generate(&model, options(0, 10), &mut rng).unwrap();

        assert_eq!(result.tries, 1);
        assert!(!result.refs.is_empty());
        let first_two = tokenize(&result.text)[..2].to_vec();
        assert!(model.starts().contains(&first_two));
        // Records that contributed no transition cannot be attributed.
        assert!(result.refs.iter().all(|r| r.id != "4"));
        assert_eq!(result.score, score(&model, &tokenize(&result.text)));
    }

    /// Counts every draw taken from the wrapped generator.
    struct CountingRng {
        inner: StdRng,
        draws: usize,
    }

    impl CountingRng {
        fn new(seed: u64) -> Self {
            Self {
                inner: StdRng::seed_from_u64(seed),
                draws: 0,
            }
        }
    }

    impl RngCore for CountingRng {
        fn next_u32(&mut self) -> u32 {
            self.draws += 1;
            self.inner.next_u32()
        }

        fn next_u64(&mut self) -> u64 {
            self.draws += 1;
            self.inner.next_u64()
        }

        fn fill_bytes(&mut self, dst: &mut [u8]) {
            self.draws += 1;
            self.inner.fill_bytes(dst)
        }
    }

    #[test]
    fn unreachable_threshold_exhausts_every_try() {
        let model = ChainModel::build(&chatter(), 2);
        let mut rng = StdRng::seed_from_u64(1);
        let err = generate(&model, options(u64::MAX, 37), &mut rng).unwrap_err();
        assert!(matches!(
            err,
            CorpusError::CorpusInsufficient { tries: 37, min_score: u64::MAX }
        ));
    }

    #[test]
    fn failed_generation_walks_once_per_try() {
        // One start and one successor per state, so every walk is identical
        // and takes the same number of draws.
        let store = RecordStore::from_records([Record::new("1", "one path only here")]);
        let model = ChainModel::build(&store, 2);

        let mut single = CountingRng::new(5);
        generate(&model, options(u64::MAX, 1), &mut single).unwrap_err();
        assert!(single.draws > 0);

        let mut many = CountingRng::new(5);
        let err = generate(&model, options(u64::MAX, 37), &mut many).unwrap_err();
        assert!(matches!(err, CorpusError::CorpusInsufficient { tries: 37, .. }));
        assert_eq!(many.draws, 37 * single.draws);
    }

    #[test]
    fn placeholder_corpus_is_insufficient() {
        let model = ChainModel::build(&RecordStore::placeholder(), 2);
        let mut rng = StdRng::seed_from_u64(3);
        let err = generate(&model, options(0, 5), &mut rng).unwrap_err();
        assert!(err.is_insufficient());
    }

    #[test]
    fn walk_stops_at_max_tokens() {
        let store = RecordStore::from_records([Record::new("1", "a a a a a a a a")]);
        let model = ChainModel::build(&store, 1);
        let mut rng = StdRng::seed_from_u64(11);
        let opts = GenerateOptions {
            min_score: 0,
            max_tries: 1,
            max_tokens: 5,
        };
        let result = generate(&model, opts, &mut rng).unwrap();
        assert_eq!(tokenize(&result.text).len(), 5);
    }

    #[test]
    fn well_attested_windows_score_higher() {
        let store = RecordStore::from_records([
            Record::new("1", "good day sir"),
            Record::new("2", "good day madam"),
            Record::new("3", "good day friend"),
            Record::new("4", "odd hour sir"),
        ]);
        let model = ChainModel::build(&store, 2);
        let common: Vec<String> = tokenize("good day sir");
        let rare: Vec<String> = tokenize("odd hour sir");
        assert_eq!(score(&model, &common), 3);
        assert_eq!(score(&model, &rare), 1);
        assert!(score(&model, &common) >= score(&model, &rare));
    }

    #[test]
    fn same_seed_same_sentence() {
        let model = ChainModel::build(&chatter(), 2);
        let a = generate(&model, options(0, 10), &mut StdRng::seed_from_u64(99)).unwrap();
        let b = generate(&model, options(0, 10), &mut StdRng::seed_from_u64(99)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn attributed_attachment_is_preferred() {
        let result = GenerationResult {
            text: "you like green tea".to_string(),
            score: 4,
            tries: 1,
            refs: vec![Record::new("3", "you like green tea too").with_attachment("https://cdn/tea.png")],
        };
        let store = vec![Record::new("9", "x").with_attachment("https://cdn/other.png")];
        let resolved = resolve_attachment(&result, &store, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(resolved.uri, "https://cdn/tea.png");
        assert_eq!(resolved.origin, AttachmentOrigin::Attributed);
    }

    #[test]
    fn attachment_falls_back_to_whole_store() {
        let result = GenerationResult {
            text: "i like green apples".to_string(),
            score: 3,
            tries: 1,
            refs: vec![Record::new("2", "i like green apples")],
        };
        let store = vec![
            Record::new("1", "plain"),
            Record::new("2", "i like green apples"),
            Record::new("3", "pic").with_attachment("https://cdn/pic.jpg"),
            Record::new("4", "more plain"),
        ];
        for seed in 0..16 {
            let resolved = resolve_attachment(&result, &store, &mut StdRng::seed_from_u64(seed)).unwrap();
            assert_eq!(resolved.uri, "https://cdn/pic.jpg");
            assert_eq!(resolved.origin, AttachmentOrigin::Fallback);
        }
    }

    #[test]
    fn no_media_anywhere_resolves_to_none() {
        let result = GenerationResult {
            text: "a b c".to_string(),
            score: 1,
            tries: 1,
            refs: vec![Record::new("1", "a b c")],
        };
        let store = vec![Record::new("1", "a b c")];
        assert!(resolve_attachment(&result, &store, &mut StdRng::seed_from_u64(0)).is_none());
    }
}
