use ctcalign::{codec, collapse, collapse_with, ctc_align, AlignConfig, Lod, LodTensor, Token};
use proptest::prelude::*;

fn align(input: &[Token], lod: Vec<usize>, blank: Token, merge_repeated: bool) -> LodTensor {
    let tensor = LodTensor::column(input.to_vec(), Lod::new(vec![lod])).unwrap();
    let config = AlignConfig::new()
        .with_blank(blank)
        .with_merge_repeated(merge_repeated);
    ctc_align(&tensor, &config).unwrap()
}

#[test]
fn keeps_repeats_without_merging() {
    let input = [0, 1, 2, 2, 0, 4, 0, 4, 5, 0, 6, 6, 0, 0, 7, 7, 7, 0];
    let out = align(&input, vec![0, 11, 18], 0, false);
    assert_eq!(out.data(), &[1, 2, 2, 4, 4, 5, 6, 6, 7, 7, 7]);
    assert_eq!(out.dims(), [11, 1]);
    assert_eq!(out.lod().levels(), &[vec![0, 7, 11]]);
}

#[test]
fn merges_repeats_between_blanks() {
    let input = [0, 1, 2, 2, 0, 4, 0, 4, 5, 0, 6, 6, 0, 0, 7, 7, 7, 0, 0];
    let out = align(&input, vec![0, 11, 19], 0, true);
    assert_eq!(out.data(), &[1, 2, 4, 4, 5, 6, 6, 7]);
    assert_eq!(out.lod().levels(), &[vec![0, 6, 8]]);
}

#[test]
fn nested_lod_collapses_per_top_level_sequence() {
    // the second sequence holds sub-sequences [5, 0] and [0, 5]
    let tensor = LodTensor::column(
        vec![5, 5, 5, 0, 0, 5],
        Lod::new(vec![vec![0, 1, 3], vec![0, 2, 4, 6]]),
    )
    .unwrap();
    let out = ctc_align(&tensor, &AlignConfig::new()).unwrap();
    assert_eq!(out.data(), &[5, 5, 5]);
    assert_eq!(out.lod().levels(), &[vec![0, 1, 3]]);

    // a run spanning two sub-sequences merges into one token
    let tensor = LodTensor::column(
        vec![3, 3, 0, 3, 3, 1, 1, 0],
        Lod::new(vec![vec![0, 2], vec![0, 4, 8]]),
    )
    .unwrap();
    let out = ctc_align(&tensor, &AlignConfig::new()).unwrap();
    assert_eq!(out.data(), &[3, 3, 1]);
    assert_eq!(out.lod().levels(), &[vec![0, 3]]);
}

#[test]
fn split_align_merge_matches_whole_batch() {
    let input: Vec<Token> = vec![0, 1, 1, 2, 0, 2, 2, 0, 3, 3, 3, 0, 4];
    let tensor = LodTensor::column(input, Lod::new(vec![vec![0, 4, 8, 10, 13]])).unwrap();
    let config = AlignConfig::new();

    let whole = ctc_align(&tensor, &config).unwrap();
    let pieces: Vec<LodTensor> = tensor
        .split(3)
        .unwrap()
        .iter()
        .map(|p| ctc_align(p, &config).unwrap())
        .collect();
    assert_eq!(LodTensor::merge(&pieces).unwrap(), whole);
}

#[test]
fn aligned_output_survives_the_codec() {
    let out = align(&[5, 5, 0, 5], vec![0, 2, 4], 0, true);
    let bytes = codec::to_bytes(&out);
    assert_eq!(codec::from_bytes(&bytes).unwrap(), out);
}

fn batch() -> impl Strategy<Value = (Vec<Vec<Token>>, Token, bool)> {
    (
        prop::collection::vec(prop::collection::vec(-1..5i32, 0..20), 0..10),
        -1..5i32,
        any::<bool>(),
    )
}

fn flatten(segments: &[Vec<Token>]) -> (Vec<Token>, Vec<usize>) {
    let mut tokens = Vec::new();
    let mut boundaries = vec![0];
    for s in segments {
        tokens.extend_from_slice(s);
        boundaries.push(tokens.len());
    }
    (tokens, boundaries)
}

proptest! {
    #[test]
    fn output_has_no_blanks((segments, blank, merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let out = collapse(&tokens, &boundaries, blank, merge).unwrap();
        prop_assert!(!out.tokens.contains(&blank));
    }

    #[test]
    fn segments_never_grow((segments, blank, merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let out = collapse(&tokens, &boundaries, blank, merge).unwrap();
        prop_assert_eq!(out.num_segments(), segments.len());
        for (input, output) in segments.iter().zip(out.segments()) {
            prop_assert!(output.len() <= input.len());
        }
    }

    #[test]
    fn without_merging_only_blanks_are_removed((segments, blank, _merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let out = collapse(&tokens, &boundaries, blank, false).unwrap();
        for (input, output) in segments.iter().zip(out.segments()) {
            let expected: Vec<Token> = input.iter().copied().filter(|&t| t != blank).collect();
            prop_assert_eq!(output, expected.as_slice());
        }
    }

    #[test]
    fn merging_dedups_each_blank_free_run((segments, blank, _merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let out = collapse(&tokens, &boundaries, blank, true).unwrap();
        for (input, output) in segments.iter().zip(out.segments()) {
            let expected: Vec<Token> = input
                .split(|&t| t == blank)
                .flat_map(|run| {
                    let mut run = run.to_vec();
                    run.dedup();
                    run
                })
                .collect();
            prop_assert_eq!(output, expected.as_slice());
        }
    }

    #[test]
    fn segments_are_independent((segments, blank, merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let together = collapse(&tokens, &boundaries, blank, merge).unwrap();

        let mut separate = Vec::new();
        for s in &segments {
            let out = collapse(s, &[0, s.len()], blank, merge).unwrap();
            separate.extend(out.tokens);
        }
        prop_assert_eq!(together.tokens, separate);
    }

    #[test]
    fn parallel_path_is_identical((segments, blank, merge) in batch()) {
        let (tokens, boundaries) = flatten(&segments);
        let sequential = collapse(&tokens, &boundaries, blank, merge).unwrap();
        let config = AlignConfig::new()
            .with_blank(blank)
            .with_merge_repeated(merge)
            .with_parallel_threshold(1);
        let parallel = collapse_with(&tokens, &boundaries, &config).unwrap();
        prop_assert_eq!(sequential, parallel);
    }
}
