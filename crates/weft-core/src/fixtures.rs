//! Small corpora shared by the unit tests.

use crate::{CorpusBuilder, FeatureValue, MemoryCorpus, NodeId};

/// Letters grouped into words and sentences: "the cat" and "a dog".
///
/// Slots 1..=10 are the letters `t h e c a t a d o g` with feature `g`.
/// Words 11..=14 carry `text` and `len`, sentences are 15 and 16.
/// Each letter points to the next one in its word along the `next` edge
/// feature.
pub fn letters() -> MemoryCorpus {
    let text = ["the", "cat", "a", "dog"];
    let total: usize = text.iter().map(|w| w.len()).sum();
    let mut b = CorpusBuilder::new("letter", total as u64);
    b.declare_edge_feature("next", None);
    let mut slot = 1u64;
    let mut words: Vec<Vec<u64>> = Vec::new();
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
        b.set_value("len", node, FeatureValue::Int(w.len() as i64))
            .expect("len");
        slot += w.len() as u64;
        words.push(slots);
    }
    b.add_node("sentence", &[words[0].clone(), words[1].clone()].concat())
        .expect("first sentence");
    b.add_node("sentence", &[words[2].clone(), words[3].clone()].concat())
        .expect("second sentence");
    b.build().expect("corpus")
}
