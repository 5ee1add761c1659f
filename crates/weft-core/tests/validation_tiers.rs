//! # Validation Tier Tests (T0-T3)
//!
//! If ANY tier fails, the engine is INVALID.
//!
//! ## Tiers
//! - T0: Template Integrity
//! - T1: Relation Semantics
//! - T2: Search Space Narrowing
//! - T3: Planning and Delivery

use std::collections::BTreeSet;
use weft_core::{
    CorpusBuilder, CustomSets, FeatureValue, MemoryCorpus, NodeId, Query, QueryState,
    ResultTuple, SearchConfig, Session, Strategy, WeftError, corpus_from_bytes, corpus_to_bytes,
};

/// "the cat" and "a dog" as letters, words and sentences.
///
/// Letters are slots 1..=10 (`t h e c a t a d o g`), words 11..=14,
/// sentences 15 and 16. Consecutive letters of a word are linked by the
/// `next` edge feature.
fn corpus() -> MemoryCorpus {
    let text = ["the", "cat", "a", "dog"];
    let mut b = CorpusBuilder::new("letter", 10);
    b.declare_edge_feature("next", None);
    let mut slot = 1u64;
    let mut words = Vec::new();
    for w in text {
        let slots: Vec<u64> = (slot..slot + w.len() as u64).collect();
        for (i, ch) in w.chars().enumerate() {
            b.set_value("g", NodeId(slots[i]), FeatureValue::text(ch.to_string()))
                .expect("letter");
            if i > 0 {
                b.add_edge("next", NodeId(slots[i - 1]), NodeId(slots[i]), None)
                    .expect("edge");
            }
        }
        let node = b.add_node("word", &slots).expect("word");
        b.set_value("text", node, FeatureValue::text(w)).expect("text");
        slot += w.len() as u64;
        words.push(slots);
    }
    b.add_node("sentence", &[words[0].clone(), words[1].clone()].concat())
        .expect("sentence");
    b.add_node("sentence", &[words[2].clone(), words[3].clone()].concat())
        .expect("sentence");
    b.build().expect("corpus")
}

fn search(session: &Session, template: &str) -> BTreeSet<ResultTuple> {
    session
        .search(template, None)
        .expect("search")
        .into_iter()
        .collect()
}

fn tuples(raw: &[&[u64]]) -> BTreeSet<ResultTuple> {
    raw.iter()
        .map(|t| t.iter().copied().map(NodeId).collect())
        .collect()
}

// =============================================================================
// TIER T0: TEMPLATE INTEGRITY
// =============================================================================

mod t0_template_integrity {
    use super::*;

    /// T0.1: A dangling quantifier end is a syntax error.
    #[test]
    fn syntax_errors_reported() {
        let session = Session::new(corpus());
        let err = session.search("word\n/-/", None).expect_err("syntax");
        assert!(matches!(err, WeftError::Syntax(_)));
        assert!(!err.diagnostics().is_empty());
    }

    /// T0.2: Unknown object types are semantic errors.
    #[test]
    fn unknown_type_rejected() {
        let session = Session::new(corpus());
        let err = session.search("verse", None).expect_err("semantic");
        assert!(matches!(err, WeftError::Semantic(_)));
        assert!(err.diagnostics()[0].message.contains("Unknown object type"));
    }

    /// T0.3: A template that falls apart is rejected.
    #[test]
    fn disconnected_template_rejected() {
        let session = Session::new(corpus());
        let err = session.search("word\nletter", None).expect_err("disconnected");
        assert!(err.diagnostics()[0].message.contains("connected components"));
    }

    /// T0.4: Unknown strategies name the allowed ones.
    #[test]
    fn unknown_strategy_lists_alternatives() {
        let session = Session::new(corpus());
        let err = session.study("word", Some("greedy")).expect_err("strategy");
        let message = err.to_string();
        assert!(message.contains("greedy"));
        for strategy in Strategy::ALL {
            assert!(message.contains(strategy.name()));
        }
    }

    /// T0.5: A failed query delivers nothing and refuses to count.
    #[test]
    fn failed_query_is_inert() {
        let corpus = corpus();
        let sets = CustomSets::new();
        let mut query = Query::new(&corpus, "verse", &sets, SearchConfig::default());
        assert_eq!(query.state(), &QueryState::Fresh);
        assert_eq!(query.count(None, None), Err(WeftError::QueryFailed));

        assert!(query.study(None).is_err());
        assert!(matches!(query.state(), QueryState::Failed(_)));
        assert!(!query.is_good());
        assert!(query.fetch(None).is_empty());
        assert_eq!(query.count(None, None), Err(WeftError::QueryFailed));
        assert_eq!(query.show_plan(true), "");
    }
}

// =============================================================================
// TIER T1: RELATION SEMANTICS
// =============================================================================

mod t1_relation_semantics {
    use super::*;

    /// T1.1: Indentation means embedding.
    #[test]
    fn indentation_embeds() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "word\n  letter g=a"),
            tuples(&[&[12, 5], &[13, 7]])
        );
    }

    /// T1.2: Adjacency follows slot boundaries across the whole corpus.
    #[test]
    fn adjacency_between_words() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "w1:word\n<: w2:word"),
            tuples(&[&[11, 12], &[12, 13], &[13, 14]])
        );
    }

    /// T1.3: Edge features relate exactly their endpoints.
    #[test]
    fn edge_feature_relation() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "l1:letter g=t\n-next> l2:letter"),
            tuples(&[&[1, 2]])
        );
    }

    /// T1.4: Boundary relations compare first slots.
    #[test]
    fn same_start() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "w:word\n=: l:letter"),
            tuples(&[&[11, 1], &[12, 4], &[13, 7], &[14, 8]])
        );
    }

    /// T1.5: The legend documents base relations and corpus edges.
    #[test]
    fn legend_is_complete() {
        let legend = Session::new(corpus()).relations_legend();
        for acro in ["[[", "]]", "<:", ":>", "=:", "&&", "||", "<k:", ".f=g.", ".f~r~g."] {
            assert!(legend.contains(acro), "missing {acro}");
        }
        assert!(legend.contains("next"));
        assert!(weft_core::relations_legend().contains("[["));
    }

    /// T1.6: Regular expressions select letters by value.
    #[test]
    fn regex_condition() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "letter g~^[aeiou]$"),
            tuples(&[&[3], &[5], &[7], &[9]])
        );
    }

    /// T1.7: Feature comparisons relate nodes by their values.
    #[test]
    fn feature_comparisons() {
        let session = Session::new(corpus());
        // t with t, a with a
        assert_eq!(
            search(&session, "l1:letter\nl2:letter\nl1 .g. l2\nl1 < l2"),
            tuples(&[&[1, 6], &[5, 7]])
        );
        // letters of "dog" that sort before the letter after them
        assert_eq!(
            search(&session, "w:word text=dog\n  l1:letter\n  <: l2:letter\nl1 .g<g. l2"),
            tuples(&[&[14, 8, 9]])
        );
    }

    /// T1.8: An atom of type `.` matches nodes of every type.
    #[test]
    fn any_type_atom() {
        let session = Session::new(corpus());
        assert_eq!(search(&session, ". g=a"), tuples(&[&[5], &[7]]));
        assert_eq!(
            search(&session, "sentence\n  . text~o"),
            tuples(&[&[16, 14]])
        );
    }
}

// =============================================================================
// TIER T2: SEARCH SPACE NARROWING
// =============================================================================

mod t2_search_space {
    use super::*;

    /// T2.1: An impossible feature leaves the query empty, not failed.
    #[test]
    fn empty_search_space() {
        let session = Session::new(corpus());
        let query = session.study("word text=zebra\n  letter", None).expect("study");
        assert_eq!(query.state(), &QueryState::Empty);
        assert!(query.is_good());
        assert!(query.fetch(None).is_empty());
        assert_eq!(query.count(None, None), Ok(0));
    }

    /// T2.2: Quantifiers filter the candidates of their atom.
    #[test]
    fn quantifiers_filter() {
        let session = Session::new(corpus());
        assert_eq!(
            search(&session, "sentence\n/without/\n  word text=a\n/-/"),
            tuples(&[&[15]])
        );
        assert_eq!(
            search(&session, "sentence\n/with/\n  word text=cat\n/or/\n  word text=dog\n/-/"),
            tuples(&[&[15], &[16]])
        );
    }

    /// T2.3: Repeating a `/without/` block changes nothing.
    #[test]
    fn without_is_idempotent() {
        let session = Session::new(corpus());
        let block = "/without/\n  letter g=a\n/-/";
        let once = search(&session, &format!("word\n{block}"));
        let twice = search(&session, &format!("word\n{block}\n{block}"));
        assert_eq!(once, tuples(&[&[11], &[14]]));
        assert_eq!(twice, once);
    }

    /// T2.4: Custom sets act as object types.
    #[test]
    fn custom_sets_as_types() {
        let mut session = Session::new(corpus());
        session.add_set("animal", [NodeId(12), NodeId(14)]);
        assert_eq!(
            search(&session, "sentence\n  animal\n    letter g=o"),
            tuples(&[&[16, 14, 9]])
        );
    }

    /// T2.5: Narrowing never loses results, whatever its work budget.
    #[test]
    fn spin_limit_is_invisible() {
        let template = "s:sentence\n  w:word\n  l:letter g=d\nw <: l";
        let tight = SearchConfig {
            spin_limit: 0,
            ..SearchConfig::default()
        };
        let a = Session::with_config(corpus(), tight);
        let b = Session::new(corpus());
        assert_eq!(search(&a, template), tuples(&[&[16, 13, 8]]));
        assert_eq!(search(&b, template), tuples(&[&[16, 13, 8]]));
    }
}

// =============================================================================
// TIER T3: PLANNING AND DELIVERY
// =============================================================================

mod t3_planning_and_delivery {
    use super::*;

    /// T3.1: All strategies deliver the same results.
    #[test]
    fn strategies_are_interchangeable() {
        let session = Session::new(corpus());
        // in "a dog" the word with an a comes first
        let template = "sentence\n  w1:word\n  < w2:word\n    letter g=a";
        let expected = tuples(&[&[15, 11, 12, 5]]);
        for strategy in Strategy::ALL {
            let query = session
                .study(template, Some(strategy.name()))
                .expect("study");
            assert_eq!(query.strategy(), strategy);
            let found: BTreeSet<ResultTuple> = query.fetch(None).into_iter().collect();
            assert_eq!(found, expected, "strategy {strategy}");
        }
    }

    /// T3.2: Ordering edges that share a target are stitched together
    /// correctly by every strategy.
    #[test]
    fn merged_ordering_edges() {
        let session = Session::new(corpus());
        let ascending = "a:word\nb:word\nc:word\na < c\nb < c\na < b";
        let around = "a:word\nb:word\nc:word\na < c\nb > c";
        for strategy in Strategy::ALL {
            let found = |template: &str| -> BTreeSet<ResultTuple> {
                session
                    .study(template, Some(strategy.name()))
                    .expect("study")
                    .fetch(None)
                    .into_iter()
                    .collect()
            };
            assert_eq!(
                found(ascending),
                tuples(&[&[11, 12, 13], &[11, 12, 14], &[11, 13, 14], &[12, 13, 14]]),
                "strategy {strategy}"
            );
            assert_eq!(
                found(around),
                tuples(&[&[11, 13, 12], &[11, 14, 12], &[11, 14, 13], &[12, 14, 13]]),
                "strategy {strategy}"
            );
        }
    }

    /// T3.3: Every query node is bound exactly once in the plan.
    #[test]
    fn plan_covers_all_nodes() {
        let session = Session::new(corpus());
        let query = session
            .study("sentence\n  word\n    letter g=t", None)
            .expect("study");
        let plan = query.plan().expect("plan");
        let mut order = plan.order.clone();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(plan.edges.len() + plan.removed.len(), 2);
    }

    /// T3.4: The plan display maps results to template lines.
    #[test]
    fn plan_display() {
        let session = Session::new(corpus());
        let query = session.study("sentence\n  word\n    letter g=t", None).expect("study");
        let short = query.show_plan(false);
        assert!(short.contains("The results are connected to the original search template"));
        assert!(short.contains("letter g=t"));
        assert!(!short.contains("Performance parameters"));

        let long = query.show_plan(true);
        assert!(long.contains("Search with 3 objects and 2 relations"));
        assert!(long.contains("Performance parameters:"));
        assert!(long.contains("spin_limit"));
        assert!(long.contains("Instantiations are computed along the following relations:"));
    }

    /// T3.5: Delivery is lazy and limits are honored.
    #[test]
    fn limits_and_counts() {
        let session = Session::new(corpus());
        let query = session.study("letter", None).expect("study");
        assert_eq!(query.results().take(3).count(), 3);
        assert_eq!(query.fetch(Some(4)).len(), 4);
        assert_eq!(query.count(Some(2), Some(5)), Ok(5));
        assert_eq!(query.count(Some(2), Some(0)), Ok(10));
        assert_eq!(session.count("letter", None, None), Ok(10));
    }

    /// T3.6: Shallow search delivers distinct prefixes as a set.
    #[test]
    fn shallow_search() {
        let session = Session::new(corpus());
        let template = "sentence\n  word\n    letter g~^[aeiou]$";
        assert_eq!(
            session.search_shallow(template, 1).expect("search"),
            tuples(&[&[15], &[16]])
        );
        assert_eq!(
            session.search_shallow(template, 2).expect("search"),
            tuples(&[&[15, 11], &[15, 12], &[16, 13], &[16, 14]])
        );
        assert_eq!(session.glean(&[NodeId(16), NodeId(14)], "g"), "sentence[a d o g] word[d o g]");
    }

    /// T3.7: Snapshots reproduce the corpus bit for bit.
    #[test]
    fn snapshot_roundtrip() {
        let original = corpus();
        let bytes = corpus_to_bytes(&original).expect("serialize");
        let restored = corpus_from_bytes(&bytes).expect("deserialize");
        assert_eq!(corpus_to_bytes(&restored).expect("serialize"), bytes);

        let template = "sentence\n  word\n    letter g=a";
        assert_eq!(
            search(&Session::new(original), template),
            search(&Session::new(restored), template)
        );
    }

    /// T3.8: Configuration loads from TOML and reaches the queries.
    #[test]
    fn configuration_from_toml() {
        let config = SearchConfig::from_toml_str("count_limit = 2\n").expect("config");
        let session = Session::with_config(corpus(), config);
        assert_eq!(session.count("letter", None, None), Ok(2));
    }
}
