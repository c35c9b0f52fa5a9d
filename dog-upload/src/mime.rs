/// Content type used when the extension is unknown
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type inferred from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_video_extensions() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.webm"), "video/webm");
        assert_eq!(content_type_for("dir/clip.MOV"), "video/quicktime");
    }

    #[test]
    fn unknown_extension_is_generic_binary() {
        assert_eq!(content_type_for("blob.zzz-unknown"), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type_for("no_extension"), DEFAULT_CONTENT_TYPE);
    }
}
