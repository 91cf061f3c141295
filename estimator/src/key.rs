use common::SubgraphKey;

/// Renders a `SubgraphKey`'s unit-index range as the `"start/end"` string
/// the profile JSON format uses, matching the original's
/// `SubgraphKey::ToString`. A key with no unit indices (whole-model) is
/// rendered as `"0/0"`.
pub fn profile_key(key: SubgraphKey) -> String {
    let (start, end) = key
        .unit_indices
        .iter_ones()
        .fold(None, |acc: Option<(usize, usize)>, index| match acc {
            None => Some((index, index)),
            Some((start, end)) => Some((start.min(index), end.max(index))),
        })
        .unwrap_or((0, 0));
    format!("{start}/{end}")
}
