use encoding_rs::WINDOWS_1252;

/// Decodes one raw field. FAERS text members are nominally UTF-8 but older
/// quarters carry Latin-1 bytes; a field that fails strict UTF-8 is decoded
/// as WINDOWS-1252, which cannot fail.
pub fn decode_field(raw: &[u8]) -> String {
    match std::str::from_utf8(raw) {
        Ok(s) => s.to_string(),
        Err(_) => WINDOWS_1252.decode(raw).0.into_owned(),
    }
}
