//! Human ordering for page paths: `page2` before `page10`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Compare two strings case-insensitively, treating each run of ASCII
/// digits as one number. Leading zeros do not affect magnitude, so `007`
/// and `7` compare equal.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut a = a.chars().peekable();
    let mut b = b.chars().peekable();

    loop {
        match (a.peek().copied(), b.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let left = digit_run(&mut a);
                let right = digit_run(&mut b);
                let ord = compare_numeric(&left, &right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                a.next();
                b.next();
                let ord = x.to_lowercase().cmp(y.to_lowercase());
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

fn digit_run(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
        run.push(c);
    }
    run
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    // same digit count means lexical order is numeric order
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digit_runs_compare_by_magnitude() {
        assert_eq!(natural_cmp("p2.jpg", "p10.jpg"), Ordering::Less);
        assert_eq!(natural_cmp("p10.jpg", "p11.jpg"), Ordering::Less);
        assert_eq!(natural_cmp("p11.jpg", "p2.jpg"), Ordering::Greater);
    }

    #[test]
    fn case_is_ignored() {
        assert_eq!(natural_cmp("A.jpg", "a.jpg"), Ordering::Equal);
        assert_eq!(natural_cmp("Page3.JPG", "page12.jpg"), Ordering::Less);
    }

    #[test]
    fn leading_zeros_do_not_change_magnitude() {
        assert_eq!(natural_cmp("007.jpg", "7.jpg"), Ordering::Equal);
        assert_eq!(natural_cmp("000009.pdg", "000010.pdg"), Ordering::Less);
        assert_eq!(
            natural_cmp("99999999999999999999999.jpg", "100000000000000000000000.jpg"),
            Ordering::Less
        );
    }

    #[test]
    fn prefixes_sort_first() {
        assert_eq!(natural_cmp("ch1", "ch1/p1"), Ordering::Less);
        assert_eq!(natural_cmp("", "a"), Ordering::Less);
    }

    #[test]
    fn sorting_a_realistic_listing() {
        let mut paths = vec!["book/p10.jpg", "book/P1.jpg", "book/p2.jpg", "book/p1a.jpg"];
        paths.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(paths, vec!["book/P1.jpg", "book/p1a.jpg", "book/p2.jpg", "book/p10.jpg"]);
    }
}
