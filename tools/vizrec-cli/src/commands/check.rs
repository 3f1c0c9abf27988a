//! Check encoder and font availability.

use vizrec_capture_engine::{
    negotiate_encoding, EncodePlan, EncoderBackend, FfmpegEncoderBackend,
};
use vizrec_common::AppConfig;
use vizrec_recording_model::PresetTable;
use vizrec_render_engine::text::GlyphPainter;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    let defaults = &config.recording;
    println!("vizrec System Check");
    println!("{}", "=".repeat(50));

    let backend = FfmpegEncoderBackend::detect(&defaults.ffmpeg_path).await;
    let ffmpeg_ok = backend.is_available();
    if ffmpeg_ok {
        let caps = backend.capabilities();
        println!(
            "[OK] ffmpeg: {} ({} encoders, {} muxers)",
            defaults.ffmpeg_path.display(),
            caps.encoders.len(),
            caps.muxers.len()
        );
    } else {
        println!("[FAIL] ffmpeg: not runnable at {}", defaults.ffmpeg_path.display());
    }

    if ffmpeg_ok {
        println!();
        println!("Encodings:");
        let presets = PresetTable::builtin();
        let mut seen = Vec::new();
        for preset in presets.iter() {
            for mime in &preset.mime_types {
                if seen.contains(mime) {
                    continue;
                }
                seen.push(mime.clone());
                let status = if backend.is_type_supported(mime) { "OK" } else { "--" };
                let detail = EncodePlan::for_mime(mime)
                    .map(|plan| {
                        format!("{} via {} + {}", plan.muxer, plan.encoder, plan.audio_encoder)
                    })
                    .unwrap_or_else(|| "no mapping".to_string());
                println!("  [{status}] {mime} ({detail})");
            }
        }
        if let Some(preset) = presets.default_preset() {
            println!(
                "  Default preset records as: {}",
                negotiate_encoding(&backend, &preset.mime_types)
            );
        }
    }

    println!();
    match GlyphPainter::discover(defaults.font_path.as_deref()) {
        Some(painter) => println!("[OK] Watermark font: {}", painter.source().display()),
        None => println!("[WARN] Watermark font: none found; watermark text will be skipped"),
    }

    println!();
    println!("  Output directory: {}", config.output_dir.display());
    println!("  Config file: {}", vizrec_common::config_file_path().display());

    println!();
    if ffmpeg_ok {
        println!("vizrec is ready to record.");
    } else {
        println!("Install ffmpeg or set recording.ffmpeg_path before recording.");
    }
    Ok(())
}
