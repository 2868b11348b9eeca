use crate::modules::video::model::QualityProfile;

/// HLS master playlist referencing one `<label>.m3u8` per rendition.
pub fn master_playlist<'a>(qualities: impl IntoIterator<Item = &'a QualityProfile>) -> String {
    let mut manifest = String::from("#EXTM3U\n");
    for q in qualities {
        manifest.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n{}.m3u8\n",
            q.bandwidth, q.width, q.height, q.label
        ));
    }
    manifest
}
