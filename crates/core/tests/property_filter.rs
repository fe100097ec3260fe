use proptest::prelude::*;
use policyqa_core::{DocumentParser, Element, ParserConfig};

proptest! {
    #[test]
    fn only_texts_longer_than_threshold_survive(
        texts in prop::collection::vec("[ a-zA-Z0-9.,]{0,40}", 1..20),
        threshold in 0usize..30,
    ) {
        let parser = DocumentParser::new(ParserConfig {
            min_chunk_chars: threshold,
            ..Default::default()
        });
        let elements: Vec<Element> = texts.iter().map(|t| Element::new(0, t.clone())).collect();
        let chunks = parser.chunks_for_document("policy.pdf", &elements);

        let expected: Vec<usize> = texts
            .iter()
            .enumerate()
            .filter(|(_, t)| t.trim().chars().count() > threshold)
            .map(|(i, _)| i)
            .collect();
        let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
        prop_assert_eq!(indices, expected);
        for chunk in &chunks {
            prop_assert!(chunk.text.chars().count() > threshold);
            prop_assert_eq!(chunk.text.trim(), chunk.text.as_str());
        }
    }
}
