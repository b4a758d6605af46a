use chrono::NaiveDateTime;

pub const COLLISION_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Joins the backup directory and a filename with exactly one `/`.
pub fn remote_path(directory: &str, filename: &str) -> String {
    format!("{}/{}", directory.trim_end_matches('/'), filename)
}

/// Inserts `_YYYYMMDD_HHMMSS` before the last `.`-delimited extension, or
/// appends it when the name has no `.` at all. Attempts after the first add
/// a counter: `_YYYYMMDD_HHMMSS_1`, `_YYYYMMDD_HHMMSS_2`, ...
pub fn collision_free_name(filename: &str, at: NaiveDateTime, attempt: u32) -> String {
    let stamp = match attempt {
        0 => at.format(COLLISION_TIMESTAMP_FORMAT).to_string(),
        n => format!("{}_{n}", at.format(COLLISION_TIMESTAMP_FORMAT)),
    };
    match filename.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}_{stamp}.{extension}"),
        None => format!("{filename}_{stamp}"),
    }
}

/// Every directory from the top of the share down to `directory`.
pub fn directory_chain(directory: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = String::new();
    for segment in directory.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        chain.push(current.clone());
    }
    chain
}
