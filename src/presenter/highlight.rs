//! Progress-based section highlighting

/// Section being narrated at `position` seconds into a `duration` second clip
///
/// Playback progress is mapped linearly onto the sections. Returns `None`
/// when there is nothing to highlight or the duration is unknown.
#[must_use]
pub fn section_for(position: f64, duration: f64, sections: usize) -> Option<usize> {
    if sections == 0 || !duration.is_finite() || duration <= 0.0 || !position.is_finite() {
        return None;
    }

    let ratio = (position / duration).clamp(0.0, 1.0);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let index = (ratio * sections as f64).floor() as usize;
    Some(index.min(sections - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_mapping() {
        assert_eq!(section_for(0.0, 10.0, 4), Some(0));
        assert_eq!(section_for(2.4, 10.0, 4), Some(0));
        assert_eq!(section_for(2.5, 10.0, 4), Some(1));
        assert_eq!(section_for(9.9, 10.0, 4), Some(3));
        assert_eq!(section_for(10.0, 10.0, 4), Some(3));
    }

    #[test]
    fn test_out_of_range_and_unknown() {
        assert_eq!(section_for(-1.0, 10.0, 3), Some(0));
        assert_eq!(section_for(50.0, 10.0, 3), Some(2));
        assert_eq!(section_for(1.0, 0.0, 3), None);
        assert_eq!(section_for(1.0, f64::NAN, 3), None);
        assert_eq!(section_for(1.0, 10.0, 0), None);
    }
}
