//! Slice helpers shared by the tree builders.

/// Partition `slice` in place so that every element satisfying `pred`
/// comes first. Returns the number of such elements. Not stable.
pub fn partition<T, F>(slice: &mut [T], pred: F) -> usize
where
    F: Fn(&T) -> bool,
{
    let mut left = 0;
    let mut right = slice.len();
    while left < right {
        if pred(&slice[left]) {
            left += 1;
        } else {
            right -= 1;
            slice.swap(left, right);
        }
    }
    left
}
