pub const NO_FILES: &str = "No files";

/// Render an owner's archive as reply-sized chunks: a `Files (N):` header
/// followed by one name per line, newest first.
pub fn render_file_list(names: &[String], max_chars: usize) -> Vec<String> {
    if names.is_empty() {
        return vec![NO_FILES.to_string()];
    }
    let text = format!("Files ({}):\n{}", names.len(), names.join("\n"));
    split_chunks(&text, max_chars)
}

/// Split `text` into pieces of at most `max_chars` characters, cutting at the
/// last newline that fits, else the last space, else mid-word.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut out = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let limit = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&idx| idx > 0)
            .unwrap_or(limit);

        let (head, tail) = rest.split_at(cut);
        out.push(head.to_string());
        rest = tail.strip_prefix(['\n', ' ']).unwrap_or(tail);
    }

    if !rest.is_empty() {
        out.push(rest.to_string());
    }
    out
}
