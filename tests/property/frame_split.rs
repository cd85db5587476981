//! Chunk boundaries never change what the frame decoder yields

use genflow::provider::frame::FrameDecoder;
use proptest::prelude::*;

fn wire_for(fragments: &[String]) -> String {
    let mut wire = String::from(": comment\n");
    for fragment in fragments {
        let frame = serde_json::json!({ "choices": [{ "delta": { "content": fragment } }] });
        wire.push_str(&format!("data: {}\n\n", frame));
    }
    wire.push_str("data: [DONE]\n\n");
    wire
}

fn decode_in_pieces(bytes: &[u8], cuts: &[usize]) -> Vec<String> {
    let mut decoder = FrameDecoder::new();
    let mut out = Vec::new();
    let mut start = 0;
    for &cut in cuts {
        out.extend(decoder.push(&bytes[start..cut]));
        start = cut;
    }
    out.extend(decoder.push(&bytes[start..]));
    out.extend(decoder.finish());
    out
}

/// Any single split point yields the same fragments as decoding in one piece
#[test]
fn test_every_split_point_matches_one_shot() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &prop::collection::vec("[a-zé漢 \\n\"{}]{1,12}", 1..6),
            |fragments| {
                let wire = wire_for(&fragments);
                let bytes = wire.as_bytes();
                let whole = decode_in_pieces(bytes, &[]);
                prop_assert_eq!(&whole, &fragments);

                for cut in 0..=bytes.len() {
                    prop_assert_eq!(decode_in_pieces(bytes, &[cut]), whole.clone());
                }
                Ok(())
            },
        )
        .unwrap();
}

/// Arbitrary multi-way splits, including inside multi-byte characters
#[test]
fn test_random_chunking_matches_one_shot() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(
                prop::collection::vec("[a-zü€ ]{1,10}", 1..5),
                prop::collection::vec(any::<prop::sample::Index>(), 0..8),
            ),
            |(fragments, indices)| {
                let wire = wire_for(&fragments);
                let bytes = wire.as_bytes();
                let mut cuts: Vec<usize> = indices.iter().map(|i| i.index(bytes.len() + 1)).collect();
                cuts.sort_unstable();

                prop_assert_eq!(decode_in_pieces(bytes, &cuts), fragments);
                Ok(())
            },
        )
        .unwrap();
}
