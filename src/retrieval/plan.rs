//! Query planning: normalization, language detection, candidate budgets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::Filters;

/// Default fused list size.
pub const DEFAULT_K: usize = 8;

/// Default lexical/vector balance.
pub const DEFAULT_ALPHA: f64 = 0.5;

/// Default RRF smoothing constant.
pub const DEFAULT_K_RRF: f64 = 60.0;

/// Default document diversification penalty.
pub const DEFAULT_LAMBDA_DOC: f64 = 0.75;

/// Default source diversification penalty.
pub const DEFAULT_LAMBDA_SRC: f64 = 0.25;

/// Graph expansion knobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GraphExpand {
    /// How many fused seeds to expand.
    pub top_n: usize,
    /// Neighbor cap per seed.
    pub max_per_seed: usize,
    /// Additive score boost on appended neighbors.
    pub boost: f64,
}

impl Default for GraphExpand {
    fn default() -> Self {
        Self {
            top_n: 3,
            max_per_seed: 2,
            boost: 0.001,
        }
    }
}

/// Caller-facing retrieval options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveOptions {
    /// Final result count.
    pub k: usize,
    /// Lexical weight in `[0, 1]`.
    pub alpha: f64,
    /// Explicit full-text candidate budget (capped by `k`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ft_k: Option<usize>,
    /// Explicit vector candidate budget (capped by `k`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vec_k: Option<usize>,
    /// Apply reciprocal rank fusion (on by default).
    pub use_rrf: bool,
    /// Apply greedy diversification.
    pub diversify: bool,
    /// Document diversification penalty.
    pub lambda_doc: f64,
    /// Source diversification penalty.
    pub lambda_src: f64,
    /// Expand fused seeds through the document graph.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_expand: Option<GraphExpand>,
    /// Apply the configured reranker.
    pub rerank: bool,
    /// Tenant filter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    /// Language override; detected from the query when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    /// Extra exact-match filters.
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            alpha: DEFAULT_ALPHA,
            ft_k: None,
            vec_k: None,
            use_rrf: true,
            diversify: false,
            lambda_doc: DEFAULT_LAMBDA_DOC,
            lambda_src: DEFAULT_LAMBDA_SRC,
            graph_expand: None,
            rerank: false,
            tenant: None,
            lang: None,
            filters: HashMap::new(),
        }
    }
}

/// The resolved plan for one retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    /// Normalized query text.
    pub query: String,
    /// Resolved language.
    pub lang: String,
    /// Full-text candidate budget.
    pub ft_k: usize,
    /// Vector candidate budget.
    pub vec_k: usize,
    /// Backend filters.
    pub filters: Filters,
}

impl QueryPlan {
    /// Build a plan from the raw query and options.
    ///
    /// Budgets: explicit `ft_k`/`vec_k` are honored (capped by `k`);
    /// otherwise `ft = ceil(k * alpha)`, `vec = k - ft`, adjusted so both
    /// sides are represented whenever `k > 1`.
    #[must_use]
    pub fn build(raw: &str, opts: &RetrieveOptions) -> Self {
        let query = normalize_query(raw);
        let lang = opts
            .lang
            .clone()
            .unwrap_or_else(|| detect_language(&query).to_owned());

        let k = opts.k.max(1);
        let alpha = opts.alpha.clamp(0.0, 1.0);

        let (ft_k, vec_k) = match (opts.ft_k, opts.vec_k) {
            (Some(ft), Some(vec)) => (ft.min(k), vec.min(k)),
            (Some(ft), None) => {
                let ft = ft.min(k);
                (ft, k - ft.min(k))
            }
            (None, Some(vec)) => {
                let vec = vec.min(k);
                (k - vec, vec)
            }
            (None, None) => {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let mut ft = (k as f64 * alpha).ceil() as usize;
                ft = ft.min(k);
                let mut vec = k - ft;
                if k > 1 {
                    if ft == 0 {
                        ft = 1;
                        vec = k - 1;
                    } else if vec == 0 {
                        vec = 1;
                        ft = k - 1;
                    }
                }
                (ft, vec)
            }
        };

        let filters = Filters {
            tenant: opts.tenant.clone(),
            lang: Some(lang.clone()),
            extra: opts.filters.clone(),
        };

        Self {
            query,
            lang,
            ft_k,
            vec_k,
            filters,
        }
    }
}

/// Collapse whitespace runs and trim.
#[must_use]
pub fn normalize_query(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

const GERMAN_STOPWORDS: &[&str] = &["der", "die", "das", "und", "ist", "nicht", "ein", "eine"];
const FRENCH_STOPWORDS: &[&str] = &["le", "la", "les", "est", "une", "des", "dans", "pas"];
const SPANISH_STOPWORDS: &[&str] = &["el", "los", "las", "es", "una", "del", "por", "como"];

/// Cheap stopword-vote language detection; defaults to `english`.
#[must_use]
pub fn detect_language(query: &str) -> &'static str {
    let mut votes = [0usize; 3];
    for word in query.to_lowercase().split_whitespace() {
        if GERMAN_STOPWORDS.contains(&word) {
            votes[0] += 1;
        }
        if FRENCH_STOPWORDS.contains(&word) {
            votes[1] += 1;
        }
        if SPANISH_STOPWORDS.contains(&word) {
            votes[2] += 1;
        }
    }
    match votes
        .iter()
        .enumerate()
        .max_by_key(|(_, votes)| **votes)
        .filter(|(_, votes)| **votes >= 2)
    {
        Some((0, _)) => "german",
        Some((1, _)) => "french",
        Some((2, _)) => "spanish",
        _ => "english",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_query("  hello \t  world \n"), "hello world");
    }

    #[test]
    fn default_language_is_english() {
        assert_eq!(detect_language("kubernetes ingress controller"), "english");
        assert_eq!(detect_language("der server ist nicht erreichbar"), "german");
    }

    #[test]
    fn alpha_splits_budgets_with_both_sides_represented() {
        let plan = QueryPlan::build("q", &RetrieveOptions {
            k: 10,
            alpha: 0.5,
            ..RetrieveOptions::default()
        });
        assert_eq!((plan.ft_k, plan.vec_k), (5, 5));

        // Extreme alpha still leaves one slot for the other side.
        let plan = QueryPlan::build("q", &RetrieveOptions {
            k: 10,
            alpha: 1.0,
            ..RetrieveOptions::default()
        });
        assert_eq!((plan.ft_k, plan.vec_k), (9, 1));

        let plan = QueryPlan::build("q", &RetrieveOptions {
            k: 10,
            alpha: 0.0,
            ..RetrieveOptions::default()
        });
        assert_eq!((plan.ft_k, plan.vec_k), (1, 9));

        // k = 1 may collapse to one side.
        let plan = QueryPlan::build("q", &RetrieveOptions {
            k: 1,
            alpha: 1.0,
            ..RetrieveOptions::default()
        });
        assert_eq!((plan.ft_k, plan.vec_k), (1, 0));
    }

    #[test]
    fn explicit_budgets_are_honored_and_capped() {
        let plan = QueryPlan::build("q", &RetrieveOptions {
            k: 5,
            ft_k: Some(100),
            vec_k: Some(2),
            ..RetrieveOptions::default()
        });
        assert_eq!((plan.ft_k, plan.vec_k), (5, 2));
    }

    #[test]
    fn filters_carry_tenant_and_lang() {
        let plan = QueryPlan::build("q", &RetrieveOptions {
            tenant: Some("acme".into()),
            lang: Some("english".into()),
            ..RetrieveOptions::default()
        });
        assert_eq!(plan.filters.tenant.as_deref(), Some("acme"));
        assert_eq!(plan.filters.lang.as_deref(), Some("english"));
    }
}
