use crate::blob::{Ref, TimeRange};

/// Remove consecutive duplicates from a sorted list
pub fn unique_strings(mut cs: Vec<String>) -> Vec<String> {
    cs.dedup();
    cs
}

/// Intersection of two sorted, duplicate-free lists
pub fn intersect_strings(left: &[String], right: &[String]) -> Vec<String> {
    let (mut i, mut j) = (0, 0);
    let mut result = Vec::new();
    while i < left.len() && j < right.len() {
        match left[i].cmp(&right[j]) {
            std::cmp::Ordering::Equal => {
                result.push(left[i].clone());
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
        }
    }
    result
}

/// Keep refs whose validity overlaps `range`
pub fn filter_refs_by_time(refs: Vec<Ref>, range: TimeRange) -> Vec<Ref> {
    refs.into_iter()
        .filter(|r| r.time_range.overlaps(&range))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unique_strings() {
        assert_eq!(
            unique_strings(strings(&["a", "a", "b", "c", "c"])),
            strings(&["a", "b", "c"])
        );
    }

    #[test]
    fn test_intersect_strings() {
        let a = strings(&["a", "c", "d", "f"]);
        let b = strings(&["b", "c", "f", "g"]);
        assert_eq!(intersect_strings(&a, &b), strings(&["c", "f"]));
        assert!(intersect_strings(&a, &[]).is_empty());
    }

    #[test]
    fn test_filter_refs_by_time() {
        let refs: Vec<Ref> = [(0, 10), (10, 20), (21, 30)]
            .iter()
            .map(|&(from, through)| Ref {
                time_range: TimeRange::new(from, through),
                ..Default::default()
            })
            .collect();
        let kept = filter_refs_by_time(refs, TimeRange::new(10, 20));
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[1].time_range, TimeRange::new(10, 20));
    }
}
