//! Merging of two lists already sorted by update time.

/// Merge `left` and `right`, both sorted ascending by `key`, into one
/// ascending list. On ties the element from `left` comes first.
pub fn merge_sorted_by_key<T, K, F>(left: Vec<T>, right: Vec<T>, key: F) -> Vec<T>
where
  K: Ord,
  F: Fn(&T) -> K,
{
  let mut merged = Vec::with_capacity(left.len() + right.len());
  let mut left = left.into_iter().peekable();
  let mut right = right.into_iter().peekable();

  while let (Some(l), Some(r)) = (left.peek(), right.peek()) {
    let next = if key(l) <= key(r) { left.next() } else { right.next() };
    merged.extend(next);
  }
  merged.extend(left);
  merged.extend(right);
  merged
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interleaves_by_time() {
    let issues = vec![("issue", 1), ("issue", 3)];
    let pulls = vec![("pr", 2), ("pr", 4)];

    let merged = merge_sorted_by_key(issues, pulls, |(_, t)| *t);
    let times: Vec<i32> = merged.iter().map(|(_, t)| *t).collect();
    assert_eq!(times, vec![1, 2, 3, 4]);
  }

  #[test]
  fn remainder_is_appended() {
    let merged = merge_sorted_by_key(vec![5, 6, 7], vec![1], |t| *t);
    assert_eq!(merged, vec![1, 5, 6, 7]);

    let merged = merge_sorted_by_key(Vec::new(), vec![2, 3], |t| *t);
    assert_eq!(merged, vec![2, 3]);
  }

  #[test]
  fn ties_prefer_left() {
    let merged = merge_sorted_by_key(vec![("l", 1)], vec![("r", 1)], |(_, t)| *t);
    assert_eq!(merged, vec![("l", 1), ("r", 1)]);
  }
}
