//! Match aggregation: category grouping, category/intra-category ordering,
//! and limit distribution.
//!
//! Items are collected in insertion order and only reordered at projection
//! time, with insertion order used as the final tie-break. The projection
//! here is two-level (category, then match) rather than flat.

use indexmap::IndexMap;

use crate::match_item::QueryMatch;

/// Runner ids in favorites order; earlier entries are more favored.
#[derive(Debug, Clone, Default)]
pub struct Favorites(Vec<String>);

impl Favorites {
    /// Builds a favorites list from an ordered sequence of runner ids.
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(ids.into_iter().map(Into::into).collect())
    }

    /// The index of `runner_id` in the favorites list, if present.
    pub fn index_of(&self, runner_id: &str) -> Option<usize> {
        self.0.iter().position(|id| id == runner_id)
    }

    /// Number of favorited runners.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the favorites list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A derived, ordered view over a [`crate::context::RunnerContext`]'s
/// matches: categories in display order, each holding its matches in
/// display order.
#[derive(Debug, Clone, Default)]
pub struct MatchStore {
    categories: IndexMap<String, Vec<QueryMatch>>,
}

impl MatchStore {
    /// Builds a store from a flat, insertion-ordered match list (as
    /// returned by [`crate::context::RunnerContext::matches`]), grouping by
    /// `category_label` while preserving first-seen category order and
    /// first-seen match order within each category.
    pub fn from_matches(matches: impl IntoIterator<Item = QueryMatch>) -> Self {
        let mut categories: IndexMap<String, Vec<QueryMatch>> = IndexMap::new();
        for m in matches {
            categories.entry(m.category_label().to_string()).or_default().push(m);
        }
        Self { categories }
    }

    /// Number of distinct categories.
    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    /// Categories in their original (unsorted) insertion order, with their
    /// matches also in insertion order. Exposed mainly for tests.
    pub fn categories(&self) -> impl Iterator<Item = (&str, &[QueryMatch])> {
        self.categories.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Effective score for a category:
    /// `max(category_relevance) * favorite_factor`, where the favorite
    /// factor only applies if the category's first (insertion-order) match
    /// was produced by a favorited runner.
    fn effective_score(matches: &[QueryMatch], favorites: &Favorites) -> f64 {
        let max_relevance = matches.iter().map(|m| m.category_relevance()).fold(0.0, f64::max);
        let top_runner_id = matches.first().and_then(|m| m.runner_id());
        let favorite_factor = match top_runner_id.as_deref().and_then(|id| favorites.index_of(id)) {
            Some(index) => 1.0 + 0.2 * (favorites.len() as f64 - index as f64),
            None => 1.0,
        };
        max_relevance * favorite_factor
    }

    /// Whether the category's top match's runner is favorited — favorite
    /// categories always sort above non-favorite ones regardless of raw
    /// score.
    fn is_favorite_category(matches: &[QueryMatch], favorites: &Favorites) -> bool {
        matches
            .first()
            .and_then(|m| m.runner_id())
            .is_some_and(|id| favorites.index_of(&id).is_some())
    }

    /// Returns categories sorted with favorite categories
    /// first (by effective score), then non-favorite categories (by
    /// effective score), ties broken by original insertion order. Within
    /// each category, matches are sorted descending by `relevance`, ties
    /// broken by insertion order.
    fn sorted_categories(&self, favorites: &Favorites) -> Vec<(&str, Vec<&QueryMatch>)> {
        let mut entries: Vec<(usize, &str, &[QueryMatch])> = self
            .categories
            .iter()
            .enumerate()
            .map(|(i, (k, v))| (i, k.as_str(), v.as_slice()))
            .collect();

        entries.sort_by(|(ia, _, a), (ib, _, b)| {
            let fav_a = Self::is_favorite_category(a, favorites);
            let fav_b = Self::is_favorite_category(b, favorites);
            fav_b
                .cmp(&fav_a)
                .then_with(|| {
                    let score_a = Self::effective_score(a, favorites);
                    let score_b = Self::effective_score(b, favorites);
                    score_b.partial_cmp(&score_a).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| ia.cmp(ib))
        });

        entries
            .into_iter()
            .map(|(_, label, matches)| {
                let mut indexed: Vec<(usize, &QueryMatch)> = matches.iter().enumerate().collect();
                indexed.sort_by(|(ia, a), (ib, b)| {
                    b.relevance()
                        .partial_cmp(&a.relevance())
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| ia.cmp(ib))
                });
                (label, indexed.into_iter().map(|(_, m)| m).collect())
            })
            .collect()
    }

    /// Per-category caps for a limit `limit` spread over `n` sorted
    /// categories:
    /// `max(1, min(limit - sum_before_i - ceil(limit/n), ceil(limit/(i+2))))`.
    fn caps(limit: usize, n: usize) -> Vec<usize> {
        if limit == 0 || n == 0 {
            return vec![usize::MAX; n];
        }
        let ceil_div = |a: usize, b: usize| a.div_ceil(b);
        let mut caps = Vec::with_capacity(n);
        let mut sum_before = 0usize;
        for i in 0..n {
            let headroom = limit.saturating_sub(sum_before).saturating_sub(ceil_div(limit, n));
            let share_cap = ceil_div(limit, i + 2);
            let cap = headroom.min(share_cap).max(1);
            caps.push(cap);
            sum_before += cap;
        }
        caps
    }

    /// The flattened, limited projection the UI consumes: categories in
    /// display order, each contributing at most its computed cap (`limit ==
    /// 0` means uncapped), concatenated in order.
    pub fn flatten(&self, favorites: &Favorites, limit: usize) -> Vec<QueryMatch> {
        let sorted = self.sorted_categories(favorites);
        let caps = Self::caps(limit, sorted.len());

        sorted
            .into_iter()
            .zip(caps)
            .flat_map(|((_, matches), cap)| matches.into_iter().take(cap).cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::action::Action;
    use crate::match_item::QueryMatchBuilder;
    use crate::runner::{Runner, RunnerMetadata};

    struct StubRunner {
        metadata: RunnerMetadata,
    }

    impl Runner for StubRunner {
        fn metadata(&self) -> &RunnerMetadata {
            &self.metadata
        }
        fn match_query(&self, _context: &crate::context::RunnerContext) {}
        fn run(&self, _context: &crate::context::RunnerContext, _m: &QueryMatch, _action: Option<&Action>) -> bool {
            true
        }
    }

    fn runner(id: &str) -> Arc<dyn Runner> {
        Arc::new(StubRunner {
            metadata: RunnerMetadata::new(id, id),
        })
    }

    #[test]
    fn caps_distribute_with_at_least_one_each() {
        let caps = MatchStore::caps(10, 4);
        assert!(caps.iter().all(|&c| c >= 1));
        assert!(caps.iter().sum::<usize>() >= 4);
        // first category gets at most half
        assert!(caps[0] <= 5);
    }

    #[test]
    fn caps_uncapped_when_limit_zero() {
        let caps = MatchStore::caps(0, 3);
        assert_eq!(caps, vec![usize::MAX; 3]);
    }

    #[test]
    fn flatten_respects_limit_and_min_one_per_category() {
        let r = runner("a");
        let matches: Vec<QueryMatch> = (0..3)
            .flat_map(|cat| {
                (0..3).map(move |i| {
                    QueryMatchBuilder::new(&r, format!("{cat}-{i}"), format!("m{cat}-{i}"))
                        .category(format!("cat{cat}"), 50.0)
                        .relevance(0.5)
                        .build()
                })
            })
            .collect();
        let store = MatchStore::from_matches(matches);
        let flattened = store.flatten(&Favorites::default(), 4);
        assert!(flattened.len() <= 4);

        let mut seen_categories = std::collections::HashSet::new();
        for m in &flattened {
            seen_categories.insert(m.category_label().to_string());
        }
        // every category contributing at all contributes >= 1; can't exceed 3 categories.
        assert!(seen_categories.len() <= 3);
    }

    #[test]
    fn favorite_category_always_sorts_first() {
        let fav_runner = runner("fav");
        let plain_runner = runner("plain");
        let favorites = Favorites::new(["fav"]);

        let high_score_plain = QueryMatchBuilder::new(&plain_runner, "1", "plain")
            .category("plain-cat", 99.0)
            .build();
        let low_score_fav = QueryMatchBuilder::new(&fav_runner, "2", "fav")
            .category("fav-cat", 1.0)
            .build();

        let store = MatchStore::from_matches(vec![high_score_plain, low_score_fav]);
        let sorted = store.sorted_categories(&favorites);
        assert_eq!(sorted[0].0, "fav-cat");
    }
}
