/// NMEA checksum: XOR of all characters of the sentence body (between the start marker and
///  `*`), as two uppercase hex digits
pub fn checksum(body: &str) -> String {
    let value = body.bytes()
        .fold(0u8, |acc, b| acc ^ b);
    format!("{:02X}", value)
}

/// Everything before the first `*`, or the whole sentence if there is no checksum suffix
pub fn strip_checksum(sentence: &str) -> &str {
    match sentence.split_once('*') {
        Some((body, _)) => body,
        None => sentence,
    }
}

/// Builds a complete sentence `<start><body>*<checksum>`
pub fn with_checksum(start_marker: char, body: &str) -> String {
    format!("{}{}*{}", start_marker, body, checksum(body))
}
