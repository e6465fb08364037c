#![no_main]

use libfuzzer_sys::fuzz_target;
use panelreel::layout::OffsetIndex;

fn floats(data: &[u8]) -> impl Iterator<Item = f32> + '_ {
    data.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
}

fuzz_target!(|data: &[u8]| {
    let Some((head, rest)) = data.split_first_chunk::<8>() else {
        return;
    };
    let position = f32::from_le_bytes([head[0], head[1], head[2], head[3]]);
    let span = f32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    let span = if span.is_finite() { span.abs() } else { 0.0 };

    // Aspect ratios may be anything, including NaN and zero.
    let ratios: Vec<f32> = floats(rest).take(256).collect();
    let index = OffsetIndex::build(&ratios, 720.0, 8.0);
    assert_eq!(index.len(), ratios.len());

    for pair in index.entries().windows(2) {
        assert!(pair[0].offset <= pair[1].offset, "offsets not monotonic");
        assert!(pair[0].height >= 0.0);
    }

    // Any position, NaN and infinities included, must map into the index.
    let Some(nearest) = index.nearest_index(position) else {
        assert!(ratios.is_empty());
        return;
    };
    assert!(nearest < index.len());
    let best = index
        .entries()
        .iter()
        .map(|e| (e.offset - position).abs())
        .fold(f32::INFINITY, f32::min);
    let got = (index.offset_of(nearest) - position).abs();
    if position.is_finite() && best.is_finite() && got.is_finite() {
        assert!(got <= best, "nearest {nearest} at distance {got}, best is {best}");
    }

    let range = index.visible_range(position, span).expect("non-empty index");
    assert!(range.start() <= range.end());
    assert!(*range.end() < index.len());
});
