//! List render presets.

use vizrec_recording_model::{PresetTable, DEFAULT_PRESET_ID};

pub fn run(json: bool) -> anyhow::Result<()> {
    let presets = PresetTable::builtin();

    if json {
        println!("{}", serde_json::to_string_pretty(&presets)?);
        return Ok(());
    }

    println!("Render presets");
    println!("{}", "=".repeat(50));
    for preset in presets.iter() {
        let marker = if preset.id == DEFAULT_PRESET_ID {
            " (default)"
        } else {
            ""
        };
        println!("{}{marker}", preset.id);
        println!("  {}", preset.label);
        println!(
            "  {}x{} @ {}fps, {:.1} Mbps video",
            preset.width,
            preset.height,
            preset.fps,
            preset.video_bits_per_second as f64 / 1_000_000.0
        );
        if let Some(audio) = preset.audio_bits_per_second {
            println!("  {} kbps audio", audio / 1000);
        }
        println!("  Encodings: {}", preset.mime_types.join(" | "));
        println!();
    }
    Ok(())
}
