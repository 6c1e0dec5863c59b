//! Near-duplicate grouping of articles into consolidated stories.
//!
//! # Algorithm
//!
//! 1. Embed `title + " " + body` for every article. Articles with an
//!    identical content hash reuse the first embedding.
//! 2. Compute cosine similarity for every pair in the batch.
//! 3. Union every pair at or above the threshold (union-find).
//! 4. Collapse each component into one [`ConsolidatedStory`].
//!
//! Similarity is treated as if it were transitive: an article close to two
//! otherwise unrelated groups merges them. Cosine similarity is not
//! transitive, so chains can join articles whose direct similarity is below
//! the threshold. This is the intended grouping policy.

use std::collections::HashMap;

use crate::embedding::{centroid, cosine_similarity};
use crate::error::PipelineError;
use crate::models::{Article, ConsolidatedStory};
use crate::provider::ModelProvider;

/// Default similarity above which two articles report the same event.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// A consolidated story plus the vector it will be stored and searched with.
#[derive(Debug, Clone)]
pub struct StoryDraft {
    pub story: ConsolidatedStory,
    /// Unit-length centroid of the member embeddings.
    pub embedding: Vec<f32>,
}

/// An article (or story) that could not be processed.
#[derive(Debug)]
pub struct ItemFailure {
    pub item_id: String,
    pub error: PipelineError,
}

/// Result of grouping one batch.
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Stories in order of their first member's position in the batch.
    pub drafts: Vec<StoryDraft>,
    /// Articles excluded because the embedding call failed.
    pub failures: Vec<ItemFailure>,
}

/// Groups a batch of articles by pairwise embedding similarity.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    threshold: f32,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self::new(DEFAULT_SIMILARITY_THRESHOLD)
    }
}

impl Deduplicator {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Embed and group a batch of already-validated articles.
    ///
    /// Never fails as a whole: an article whose embedding fails is reported
    /// in [`DedupOutcome::failures`] and left out of every story.
    pub async fn group<P>(&self, provider: &P, articles: &[Article]) -> DedupOutcome
    where
        P: ModelProvider + ?Sized,
    {
        let mut embedded: Vec<(&Article, String, Vec<f32>)> = Vec::with_capacity(articles.len());
        let mut by_hash: HashMap<String, usize> = HashMap::new();
        let mut failures = Vec::new();

        for article in articles {
            let hash = article.content_hash();
            if let Some(&i) = by_hash.get(&hash) {
                let vector = embedded[i].2.clone();
                embedded.push((article, hash, vector));
                continue;
            }

            match provider.embed(&article.text()).await {
                Ok(vector) if !vector.is_empty() => {
                    by_hash.insert(hash.clone(), embedded.len());
                    embedded.push((article, hash, vector));
                }
                Ok(_) => {
                    tracing::warn!(article = %article.id, "empty embedding; article excluded from grouping");
                    failures.push(ItemFailure {
                        item_id: article.id.clone(),
                        error: PipelineError::provider(&article.id, "empty embedding"),
                    });
                }
                Err(e) => {
                    tracing::warn!(article = %article.id, error = %e, "embedding failed; article excluded from grouping");
                    failures.push(ItemFailure {
                        item_id: article.id.clone(),
                        error: PipelineError::provider(&article.id, e),
                    });
                }
            }
        }

        let items: Vec<(&str, &[f32])> = embedded
            .iter()
            .map(|(_, hash, v)| (hash.as_str(), v.as_slice()))
            .collect();
        let groups = self.partition(&items);

        let drafts: Vec<StoryDraft> = groups
            .iter()
            .map(|members| {
                let articles: Vec<&Article> = members.iter().map(|&i| embedded[i].0).collect();
                let embedding = centroid(members.iter().map(|&i| embedded[i].2.as_slice()));
                StoryDraft {
                    story: consolidate(&articles),
                    embedding,
                }
            })
            .collect();

        tracing::debug!(
            articles = articles.len(),
            stories = drafts.len(),
            failures = failures.len(),
            threshold = self.threshold,
            "batch grouped"
        );

        DedupOutcome { drafts, failures }
    }

    /// Partition items into similarity groups.
    ///
    /// Each item is `(content_key, vector)`. Items sharing a content key are
    /// always grouped; otherwise pairs with cosine similarity at or above the
    /// threshold are joined, transitively. Every similarity is computed
    /// before any union happens. Groups are returned in order of their
    /// smallest index, members ascending.
    pub fn partition(&self, items: &[(&str, &[f32])]) -> Vec<Vec<usize>> {
        let n = items.len();
        let mut edges: Vec<(usize, usize)> = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                let same_content = items[i].0 == items[j].0;
                if same_content || cosine_similarity(items[i].1, items[j].1) >= self.threshold {
                    edges.push((i, j));
                }
            }
        }

        let mut set = DisjointSet::new(n);
        for (i, j) in edges {
            set.union(i, j);
        }

        let mut group_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for i in 0..n {
            let root = set.find(i);
            let g = *group_of_root.entry(root).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[g].push(i);
        }
        groups
    }
}

/// Merge the members of one similarity group into a story.
///
/// Title and body come from the longest member text (earliest member on
/// ties); the timestamp is the earliest known one.
pub fn consolidate(members: &[&Article]) -> ConsolidatedStory {
    let first_id = members.first().map(|a| a.id.as_str()).unwrap_or_default();

    let longest = |pick: fn(&Article) -> &str| -> String {
        let mut best = "";
        for a in members {
            let candidate = pick(a);
            if candidate.chars().count() > best.chars().count() {
                best = candidate;
            }
        }
        best.to_string()
    };

    let mut sources: Vec<String> = Vec::new();
    for src in members.iter().filter_map(|a| a.source.as_ref()) {
        if !sources.contains(src) {
            sources.push(src.clone());
        }
    }

    ConsolidatedStory {
        id: ConsolidatedStory::id_for(first_id),
        title: longest(|a| a.title.as_str()),
        body: longest(|a| a.body.as_str()),
        published_at: members.iter().filter_map(|a| a.published_at).min(),
        member_ids: members.iter().map(|a| a.id.clone()).collect(),
        sources,
    }
}

/// Union-find with path halving and union by rank.
#[derive(Debug)]
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::stub::StubProvider;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    fn article(id: &str, title: &str, body: &str) -> Article {
        Article {
            id: id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            published_at: None,
            source: None,
            url: None,
        }
    }

    fn rbi_batch() -> (StubProvider, Vec<Article>) {
        let provider = StubProvider::new()
            .with_embedding("RBI increases repo rate", vec![1.0, 0.10, 0.00])
            .with_embedding("Reserve Bank hikes interest rates", vec![1.0, 0.00, 0.10])
            .with_embedding("Central bank raises policy rate", vec![0.95, 0.10, 0.10])
            .with_embedding("RBI monetary policy", vec![1.0, 0.05, 0.05])
            .with_embedding("HDFC Bank announces dividend", vec![0.0, 1.0, 0.0]);
        let articles = vec![
            article("N2", "RBI increases repo rate by 25 basis points", "The Reserve Bank of India increased the repo rate."),
            article("N5", "Reserve Bank hikes interest rates by 0.25%", "The Reserve Bank of India hiked rates in a surprise move."),
            article("N6", "Central bank raises policy rate 25bps", "The central bank raised the policy rate by 25 basis points."),
            article("N9", "RBI monetary policy: Repo rate up by 25 bps", "A 25 basis point increase in the repo rate to 6.75%."),
            article("N1", "HDFC Bank announces dividend", "HDFC Bank announced a 15% dividend."),
        ];
        (provider, articles)
    }

    #[tokio::test]
    async fn test_paraphrases_collapse_into_one_story() {
        let (provider, articles) = rbi_batch();
        let outcome = Deduplicator::default().group(&provider, &articles).await;

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.drafts.len(), 2);
        assert_eq!(outcome.drafts[0].story.member_ids, vec!["N2", "N5", "N6", "N9"]);
        assert_eq!(outcome.drafts[0].story.id, "story-N2");
        assert_eq!(outcome.drafts[1].story.member_ids, vec!["N1"]);
    }

    #[tokio::test]
    async fn test_every_article_in_exactly_one_story() {
        let (provider, articles) = rbi_batch();
        let outcome = Deduplicator::default().group(&provider, &articles).await;

        let mut seen = HashSet::new();
        for draft in &outcome.drafts {
            for id in &draft.story.member_ids {
                assert!(seen.insert(id.clone()), "{} appears twice", id);
            }
        }
        let all: HashSet<String> = articles.iter().map(|a| a.id.clone()).collect();
        assert_eq!(seen, all);
    }

    #[tokio::test]
    async fn test_isolated_article_forms_singleton() {
        let provider = StubProvider::new()
            .with_embedding("Infosys", vec![1.0, 0.0])
            .with_embedding("Maruti", vec![0.0, 1.0]);
        let articles = vec![
            article("a", "Infosys wins deal", "Large contract."),
            article("b", "Maruti sales climb", "Record month."),
        ];
        let outcome = Deduplicator::default().group(&provider, &articles).await;
        assert_eq!(outcome.drafts.len(), 2);
        assert!(outcome.drafts.iter().all(|d| d.story.member_ids.len() == 1));
    }

    #[tokio::test]
    async fn test_embedding_failure_is_per_item() {
        let (provider, articles) = rbi_batch();
        let provider = provider.failing_embed_for("Central bank");
        let outcome = Deduplicator::default().group(&provider, &articles).await;

        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].item_id, "N6");
        assert!(matches!(outcome.failures[0].error, PipelineError::ProviderFailure { .. }));
        let grouped: usize = outcome.drafts.iter().map(|d| d.story.member_ids.len()).sum();
        assert_eq!(grouped, 4);
    }

    #[tokio::test]
    async fn test_identical_content_embedded_once() {
        let provider = StubProvider::new().with_embedding("Wipro", vec![0.3, 0.7]);
        let articles = vec![
            article("w1", "Wipro results", "Profit up."),
            article("w2", "Wipro results", "Profit up."),
        ];
        let outcome = Deduplicator::default().group(&provider, &articles).await;
        assert_eq!(provider.embed_calls(), 1);
        assert_eq!(outcome.drafts.len(), 1);
        assert_eq!(outcome.drafts[0].story.member_ids, vec!["w1", "w2"]);
    }

    #[test]
    fn test_chain_merges_transitively() {
        // a~b and b~c clear the threshold; a~c (0.5) does not.
        let a = [1.0f32, 0.0];
        let b = [0.866f32, 0.5];
        let c = [0.5f32, 0.866];
        let groups = Deduplicator::default().partition(&[("a", &a[..]), ("b", &b[..]), ("c", &c[..])]);
        assert_eq!(groups, vec![vec![0, 1, 2]]);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let a = [1.0f32, 0.0];
        let b = [0.6f32, 0.8];
        let sim = cosine_similarity(&a, &b);
        let groups = Deduplicator::new(sim).partition(&[("a", &a[..]), ("b", &b[..])]);
        assert_eq!(groups.len(), 1);
        let groups = Deduplicator::new(sim + 0.01).partition(&[("a", &a[..]), ("b", &b[..])]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_consolidate_merges_fields() {
        let mut a = article("a", "Short", "A much longer body text here.");
        a.published_at = Some(Utc.with_ymd_and_hms(2024, 2, 8, 10, 0, 0).unwrap());
        a.source = Some("Mint".into());
        let mut b = article("b", "A considerably longer title", "Short body.");
        b.published_at = Some(Utc.with_ymd_and_hms(2024, 2, 8, 9, 30, 0).unwrap());
        b.source = Some("Mint".into());
        let mut c = article("c", "Mid title", "Mid body");
        c.source = Some("ET".into());

        let story = consolidate(&[&a, &b, &c]);
        assert_eq!(story.id, "story-a");
        assert_eq!(story.title, "A considerably longer title");
        assert_eq!(story.body, "A much longer body text here.");
        assert_eq!(story.published_at, b.published_at);
        assert_eq!(story.member_ids, vec!["a", "b", "c"]);
        assert_eq!(story.sources, vec!["Mint", "ET"]);
    }
}
