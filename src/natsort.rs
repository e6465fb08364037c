//! Natural ("human") ordering for archive entry and file names.
//!
//! Runs of ASCII digits compare by numeric value, so `page2` sorts before
//! `page10`. Everything else compares char by char.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Compare two strings in natural order.
///
/// Ties between numerically equal runs with different zero padding (`07`
/// vs `7`) are broken by run length so the ordering stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut ia = a.chars().peekable();
    let mut ib = b.chars().peekable();

    loop {
        match (ia.peek().copied(), ib.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(ca), Some(cb)) if ca.is_ascii_digit() && cb.is_ascii_digit() => {
                let ra = take_digits(&mut ia);
                let rb = take_digits(&mut ib);
                let ord = cmp_digit_runs(&ra, &rb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(ca), Some(cb)) => {
                if ca != cb {
                    return ca.cmp(&cb);
                }
                ia.next();
                ib.next();
            }
        }
    }
}

/// Sort a slice of names in natural order (stable).
pub fn sort_natural<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by(|a, b| natural_cmp(a.as_ref(), b.as_ref()));
}

fn take_digits(it: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        it.next();
    }
    run
}

/// Compare digit runs by value without parsing (no overflow on long runs).
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let ta = a.trim_start_matches('0');
    let tb = b.trim_start_matches('0');
    ta.len()
        .cmp(&tb.len())
        .then_with(|| ta.cmp(tb))
        .then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_runs_compare_by_value() {
        assert_eq!(natural_cmp("page2", "page10"), Ordering::Less);
        assert_eq!(natural_cmp("page10", "page2"), Ordering::Greater);
        assert_eq!(natural_cmp("p9.jpg", "p10.jpg"), Ordering::Less);
    }

    #[test]
    fn prefix_sorts_first() {
        assert_eq!(natural_cmp("page", "page1"), Ordering::Less);
        assert_eq!(natural_cmp("", "a"), Ordering::Less);
        assert_eq!(natural_cmp("abc", "abc"), Ordering::Equal);
    }

    #[test]
    fn zero_padding_is_a_tiebreak_only() {
        assert_eq!(natural_cmp("007", "8"), Ordering::Less);
        assert_eq!(natural_cmp("7", "007"), Ordering::Less);
        assert_eq!(natural_cmp("007", "7"), Ordering::Greater);
    }

    #[test]
    fn long_runs_do_not_overflow() {
        let a = "vol99999999999999999999999999 page1";
        let b = "vol100000000000000000000000000 page1";
        assert_eq!(natural_cmp(a, b), Ordering::Less);
    }

    #[test]
    fn sorts_archive_entries() {
        let mut names = vec!["ch1/p10.png", "ch1/p2.png", "ch1/p1.png", "ch10/p1.png", "ch2/p1.png"];
        sort_natural(&mut names);
        assert_eq!(
            names,
            ["ch1/p1.png", "ch1/p2.png", "ch1/p10.png", "ch2/p1.png", "ch10/p1.png"]
        );
    }
}
