//! Short, filesystem-safe, per-owner-unique names for archived objects.

/// Characters that never make it into an assigned filename.
pub const FORBIDDEN_CHARS: &[char] = &['\\', '/', '*', '?', ':', '\'', '"'];

const PART_SEPARATOR: &str = " - ";
const FALLBACK_EXTENSION: &str = "bin";
const FALLBACK_STEM: &str = "media";

/// Collapse double spaces, then drop every forbidden character.
pub fn sanitize(input: &str) -> String {
    let mut collapsed = input.to_string();
    while collapsed.contains("  ") {
        collapsed = collapsed.replace("  ", " ");
    }
    collapsed
        .chars()
        .filter(|ch| !FORBIDDEN_CHARS.contains(ch))
        .collect::<String>()
        .trim()
        .to_string()
}

fn base_stem(candidate_parts: &[Option<&str>], fallback_id: &str) -> String {
    // Parts are cleaned one by one so a part made only of forbidden characters
    // does not leave a dangling separator behind.
    let joined = candidate_parts
        .iter()
        .flatten()
        .map(|part| sanitize(part))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(PART_SEPARATOR);

    let stem = sanitize(&joined);
    if !stem.is_empty() {
        return stem;
    }
    fallback_stem(fallback_id)
}

fn fallback_stem(fallback_id: &str) -> String {
    let id = sanitize(fallback_id);
    if id.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        id
    }
}

fn clean_extension(extension: &str) -> String {
    let ext = sanitize(extension.trim().trim_start_matches('.'));
    if ext.is_empty() {
        FALLBACK_EXTENSION.to_string()
    } else {
        ext
    }
}

const MAX_COUNTER: u32 = 99;

/// Pick a name for a new object.
///
/// `is_taken` reports whether the owner already has a record using a name.
/// On a collision the sanitized `fallback_id` is prefixed to the name. Ids
/// that only differ in forbidden characters share that prefix, so a taken
/// prefixed name gets a ` (2)`, ` (3)`, ... counter before the extension.
/// The store's uniqueness constraint still has the final word if two callers
/// race.
pub fn allocate<E>(
    candidate_parts: &[Option<&str>],
    fallback_id: &str,
    extension: &str,
    mut is_taken: impl FnMut(&str) -> Result<bool, E>,
) -> Result<String, E> {
    let ext = clean_extension(extension);
    let stem = base_stem(candidate_parts, fallback_id);
    let name = format!("{stem}.{ext}");
    if !is_taken(&name)? {
        return Ok(name);
    }

    let prefixed_stem = format!("{}_{stem}", fallback_stem(fallback_id));
    let mut candidate = format!("{prefixed_stem}.{ext}");
    for counter in 2..=MAX_COUNTER {
        if !is_taken(&candidate)? {
            return Ok(candidate);
        }
        candidate = format!("{prefixed_stem} ({counter}).{ext}");
    }
    if is_taken(&candidate)? {
        tracing::debug!(name = %candidate, "every candidate name in use; insert will arbitrate");
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::convert::Infallible;

    fn free(_: &str) -> Result<bool, Infallible> {
        Ok(false)
    }

    #[test]
    fn performer_and_title_are_joined() {
        let got = allocate(&[Some("Bob"), Some("Song")], "u1", "mp3", free).unwrap();
        assert_eq!(got, "Bob - Song.mp3");
    }

    #[test]
    fn parts_are_trimmed_and_blank_parts_skipped() {
        let got = allocate(&[Some("  Bob "), Some("   ")], "u1", "mp3", free).unwrap();
        assert_eq!(got, "Bob.mp3");
        let got = allocate(&[None, Some("Song")], "u1", "ogg", free).unwrap();
        assert_eq!(got, "Song.ogg");
    }

    #[test]
    fn empty_parts_fall_back_to_unique_id() {
        let got = allocate(&[None, Some("")], "u1", "mp3", free).unwrap();
        assert_eq!(got, "u1.mp3");
    }

    #[test]
    fn parts_that_sanitize_to_nothing_fall_back_to_unique_id() {
        let got = allocate(&[Some("???"), Some("//")], "u:1", "mp3", free).unwrap();
        assert_eq!(got, "u1.mp3");
    }

    #[test]
    fn forbidden_characters_are_stripped() {
        let got = allocate(&[Some("A/B"), Some("C")], "u1", "mp3", free).unwrap();
        assert_eq!(got, "AB - C.mp3");

        let got = allocate(
            &[Some(r#"It's "A\B*C?"#), Some("x:y")],
            "u1",
            "mp3",
            free,
        )
        .unwrap();
        assert!(!got.chars().any(|c| FORBIDDEN_CHARS.contains(&c)));
        assert_eq!(got, "Its ABC - xy.mp3");
    }

    #[test]
    fn double_spaces_are_collapsed() {
        assert_eq!(sanitize("a  b    c"), "a b c");
        let got = allocate(&[Some("Big  Band"), Some("Tune")], "u1", "mp3", free).unwrap();
        assert_eq!(got, "Big Band - Tune.mp3");
    }

    #[test]
    fn collision_prefixes_the_unique_id() {
        let taken: BTreeSet<&str> = ["Bob - Song.mp3"].into_iter().collect();
        let got = allocate(&[Some("Bob"), Some("Song")], "AgADx1", "mp3", |name: &str| {
            Ok::<_, Infallible>(taken.contains(name))
        })
        .unwrap();
        assert_eq!(got, "AgADx1_Bob - Song.mp3");
    }

    #[test]
    fn free_prefixed_name_needs_exactly_two_checks() {
        let mut calls = 0;
        let got = allocate(&[Some("Bob"), Some("Song")], "u2", "mp3", |name: &str| {
            calls += 1;
            Ok::<_, Infallible>(name == "Bob - Song.mp3")
        })
        .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(got, "u2_Bob - Song.mp3");
    }

    #[test]
    fn ids_sharing_a_prefix_get_a_counter() {
        // `u:1` and `u1` sanitize to the same prefix.
        let taken: BTreeSet<&str> = ["Bob - Song.mp3", "u1_Bob - Song.mp3"]
            .into_iter()
            .collect();
        let got = allocate(&[Some("Bob"), Some("Song")], "u:1", "mp3", |name: &str| {
            Ok::<_, Infallible>(taken.contains(name))
        })
        .unwrap();
        assert_eq!(got, "u1_Bob - Song (2).mp3");

        let taken: BTreeSet<&str> = [
            "Bob - Song.mp3",
            "u1_Bob - Song.mp3",
            "u1_Bob - Song (2).mp3",
        ]
        .into_iter()
        .collect();
        let got = allocate(&[Some("Bob"), Some("Song")], "u:1", "mp3", |name: &str| {
            Ok::<_, Infallible>(taken.contains(name))
        })
        .unwrap();
        assert_eq!(got, "u1_Bob - Song (3).mp3");
    }

    #[test]
    fn counter_is_bounded_when_everything_is_taken() {
        let mut calls = 0;
        let got = allocate(&[Some("Bob"), Some("Song")], "u2", "mp3", |_: &str| {
            calls += 1;
            Ok::<_, Infallible>(true)
        })
        .unwrap();
        assert_eq!(got, "u2_Bob - Song (99).mp3");
        assert_eq!(calls, 1 + 99);
    }

    #[test]
    fn predicate_errors_propagate() {
        let got = allocate(&[Some("Bob")], "u1", "mp3", |_: &str| Err("store down"));
        assert_eq!(got, Err("store down"));
    }

    #[test]
    fn extension_is_sanitized_and_never_empty() {
        let got = allocate(&[Some("Bob")], "u1", ".mp3", free).unwrap();
        assert_eq!(got, "Bob.mp3");
        let got = allocate(&[Some("Bob")], "u1", "?", free).unwrap();
        assert_eq!(got, "Bob.bin");
    }
}
