//! Property tests for reshape layout aliasing
//!
//! Whenever an alias is found, walking the output lens with the output
//! strides must visit the same storage offsets, in the same order, as
//! walking the input.

use proptest::prelude::*;
use proptest::sample::Index;
use tgc_ops::reshape::layout::{alias_strides, reshape_dims};
use tgc_ops::{Argument, Context, DynOutput, OpError, Operation, Reshape};
use tgc_shape::{DType, Shape, StaticShape};

/// Every ordered factorization of `n` into at most `max_rank` factors of at
/// least 2, plus each of those with a single unit axis inserted.
fn factorizations(n: usize, max_rank: usize) -> Vec<Vec<usize>> {
    fn go(n: usize, max_rank: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if n == 1 {
            out.push(prefix.clone());
            return;
        }
        if prefix.len() == max_rank {
            return;
        }
        for f in 2..=n {
            if n % f == 0 {
                prefix.push(f);
                go(n / f, max_rank, prefix, out);
                prefix.pop();
            }
        }
    }

    let mut plain = Vec::new();
    go(n, max_rank, &mut Vec::new(), &mut plain);
    let mut all = plain.clone();
    for dims in plain.iter().filter(|d| d.len() < max_rank) {
        for pos in 0..=dims.len() {
            let mut with_unit = dims.clone();
            with_unit.insert(pos, 1);
            all.push(with_unit);
        }
    }
    if all.is_empty() {
        all.push(vec![n]);
    }
    all
}

/// Strides that lay `lens` out in `order` (outermost first), padding each
/// axis by the matching factor.
fn permuted_strides(lens: &[usize], order: &[usize], padding: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; lens.len()];
    let mut running = 1;
    for (&axis, &pad) in order.iter().zip(padding).rev() {
        strides[axis] = running;
        running *= lens[axis] * pad;
    }
    strides
}

fn offsets(shape: &StaticShape) -> Vec<usize> {
    shape.offsets().collect()
}

fn strided_shape() -> impl Strategy<Value = StaticShape> {
    prop::collection::vec(1usize..=4, 1..=4).prop_flat_map(|lens| {
        let rank = lens.len();
        (
            Just(lens),
            Just((0..rank).collect::<Vec<_>>()).prop_shuffle(),
            prop::collection::vec(1usize..=2, rank),
        )
            .prop_map(|(lens, order, padding)| {
                let strides = permuted_strides(&lens, &order, &padding);
                StaticShape::with_strides(DType::Int32, lens, strides).unwrap()
            })
    })
}

// ============================================================
// Layout aliasing
// ============================================================

proptest! {
    #[test]
    fn alias_preserves_offsets(input in strided_shape(), pick in any::<Index>()) {
        let candidates = factorizations(input.elements(), 4);
        let rdims = pick.get(&candidates);
        if let Ok(output) = reshape_dims(&input, rdims) {
            prop_assert_eq!(output.lens(), rdims.as_slice());
            prop_assert_eq!(offsets(&output), offsets(&input));
        }
    }

    #[test]
    fn standard_input_always_aliases(
        lens in prop::collection::vec(1usize..=4, 1..=4),
        pick in any::<Index>(),
    ) {
        let input = StaticShape::standard(DType::Float32, lens);
        let candidates = factorizations(input.elements(), 4);
        let rdims = pick.get(&candidates);
        let output = reshape_dims(&input, rdims).unwrap();
        prop_assert!(output.is_standard());
    }

    #[test]
    fn identity_reshape_keeps_strides(input in strided_shape()) {
        let strides = alias_strides(input.lens(), input.strides(), input.lens()).unwrap();
        prop_assert_eq!(strides.as_slice(), input.strides());
    }
}

// ============================================================
// Reshape operator
// ============================================================

proptest! {
    #[test]
    fn resolved_dims_conserve_elements(
        lens in prop::collection::vec(1usize..=5, 1..=4),
        choices in prop::collection::vec(0u8..2, 4),
        infer in any::<Index>(),
    ) {
        let input = Shape::from_lens(DType::Float32, lens.iter().copied());
        let slot = infer.index(lens.len());
        let dims: Vec<i64> = lens
            .iter()
            .zip(&choices)
            .enumerate()
            .map(|(i, (&len, &choice))| match (i == slot, choice) {
                (true, _) => -1,
                (false, 0) => 0,
                (false, _) => i64::try_from(len).unwrap(),
            })
            .collect();
        let out = Reshape::new(dims).compute_shape(&[input.clone()]).unwrap();
        prop_assert_eq!(out.elements(), input.elements());
        prop_assert_eq!(out.as_static().unwrap().lens(), lens.as_slice());
    }

    #[test]
    fn reshape_preserves_logical_order(input in strided_shape(), pick in any::<Index>()) {
        let data: Vec<i32> = (0..).take(input.element_space()).collect();
        let arg = Argument::from_slice(input.clone(), &data).unwrap();
        let expected = arg.to_vec::<i32>().unwrap();

        let candidates = factorizations(input.elements(), 4);
        let dims: Vec<i64> = pick
            .get(&candidates)
            .iter()
            .map(|&d| i64::try_from(d).unwrap())
            .collect();
        let op = Reshape::new(dims);
        match op.compute_shape(&[Shape::Static(input)]) {
            Ok(shape) => {
                let out = DynOutput::resolve(&op, &shape, std::slice::from_ref(&arg)).unwrap();
                let result = op.compute(&Context::new(), &out, std::slice::from_ref(&arg)).unwrap();
                prop_assert_eq!(result.to_vec::<i32>().unwrap(), expected);
            }
            Err(err) => prop_assert!(err.is_aliasing_failure(), "unexpected error {}", err),
        }
    }
}

// ============================================================
// Exhaustive small shapes
// ============================================================

fn permutations(rank: usize) -> Vec<Vec<usize>> {
    if rank == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(rank - 1) {
        for pos in 0..=rest.len() {
            let mut perm = rest.clone();
            perm.insert(pos, rank - 1);
            out.push(perm);
        }
    }
    out
}

fn all_lens(max_rank: usize, max_len: usize) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    let mut frontier = vec![Vec::new()];
    for _ in 0..max_rank {
        let mut next = Vec::new();
        for lens in &frontier {
            for len in 1..=max_len {
                let mut grown: Vec<usize> = lens.clone();
                grown.push(len);
                next.push(grown);
            }
        }
        out.extend(next.iter().cloned());
        frontier = next;
    }
    out.retain(|lens| !lens.is_empty());
    out
}

#[test]
fn exhaustive_permuted_layouts() {
    let mut aliased = 0usize;
    let mut rejected = 0usize;
    for lens in all_lens(3, 4) {
        for order in permutations(lens.len()) {
            let padding = vec![1; lens.len()];
            let strides = permuted_strides(&lens, &order, &padding);
            let input = StaticShape::with_strides(DType::Int8, lens.clone(), strides).unwrap();
            for rdims in factorizations(input.elements(), 4) {
                match reshape_dims(&input, &rdims) {
                    Ok(output) => {
                        assert_eq!(
                            offsets(&output),
                            offsets(&input),
                            "{input} as {rdims:?} gave {output}"
                        );
                        aliased += 1;
                    }
                    Err(_) => {
                        assert!(!input.is_standard(), "standard {input} rejected {rdims:?}");
                        rejected += 1;
                    }
                }
            }
        }
    }
    assert!(aliased > 0 && rejected > 0);
}

#[test]
fn aliasing_failure_reports_dims() {
    let input = Shape::with_strides(DType::Float32, [2, 3], [1, 2]).unwrap();
    let err = Reshape::new([6]).compute_shape(&[input]).unwrap_err();
    match err {
        OpError::AliasingFailure { dims, .. } => assert_eq!(dims, vec![6]),
        other => panic!("expected aliasing failure, got {other}"),
    }
}
