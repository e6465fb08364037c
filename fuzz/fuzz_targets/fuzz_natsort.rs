#![no_main]

use std::cmp::Ordering;

use libfuzzer_sys::fuzz_target;
use panelreel::natsort::{natural_cmp, sort_natural};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let names: Vec<&str> = text.split('\n').take(16).collect();

    for a in &names {
        assert_eq!(natural_cmp(a, a), Ordering::Equal);
        for b in &names {
            let ab = natural_cmp(a, b);
            // Antisymmetric, and equal only for identical names.
            assert_eq!(ab, natural_cmp(b, a).reverse(), "{a:?} vs {b:?}");
            assert_eq!(ab == Ordering::Equal, a == b, "{a:?} vs {b:?}");
            for c in &names {
                if ab != Ordering::Greater && natural_cmp(b, c) != Ordering::Greater {
                    assert_ne!(natural_cmp(a, c), Ordering::Greater, "{a:?} {b:?} {c:?}");
                }
            }
        }
    }

    let mut sorted = names.clone();
    sort_natural(&mut sorted);
    for pair in sorted.windows(2) {
        assert_ne!(natural_cmp(pair[0], pair[1]), Ordering::Greater);
    }
});
