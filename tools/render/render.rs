use anyhow::{Context, Result};
use disperser::dsp::analysis::{group_delay, max_magnitude_deviation_db};
use disperser::dsp::utils::{frame_rms, peak_abs};
use disperser::dsp::{Controls, DisperserProcessor};
use disperser::settings::DisperserSettings;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::PathBuf;

const BLOCK: usize = 512;
const IR_LEN: usize = 16384;

fn usage() -> ! {
    eprintln!("usage: disperser_render <input.wav> <output.wav> [settings.json]");
    std::process::exit(2);
}

fn read_channels(path: &PathBuf) -> Result<(Vec<Vec<f32>>, u32)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .context("failed to decode float samples")?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                anyhow::bail!("unsupported bit depth {}", spec.bits_per_sample);
            }
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .context("failed to decode integer samples")?
        }
    };

    // Only the first two channels are processed.
    let used = channels.min(2);
    let frames = interleaved.len() / channels;
    let mut out = vec![Vec::with_capacity(frames); used];
    for frame in interleaved.chunks_exact(channels) {
        for (ch, buf) in out.iter_mut().enumerate() {
            buf.push(frame[ch]);
        }
    }
    Ok((out, spec.sample_rate))
}

fn render(channels: &mut [Vec<f32>], sample_rate: f32, controls: &Controls) -> DisperserProcessor {
    let mut processor = DisperserProcessor::new();
    processor.prepare(sample_rate, BLOCK);
    let mut views: Vec<&mut [f32]> = channels.iter_mut().map(|c| c.as_mut_slice()).collect();
    processor.process(&mut views, controls);
    processor
}

fn impulse_report(sample_rate: f32, controls: &Controls) {
    let mut ir_processor = DisperserProcessor::new();
    ir_processor.prepare(sample_rate, BLOCK);
    // Warm-up block so the reported latency is the configured one.
    let mut silence = vec![0.0f32; BLOCK];
    ir_processor.process(&mut [silence.as_mut_slice()], controls);
    ir_processor.reset();

    let mut ir = vec![0.0f32; IR_LEN + ir_processor.latency_samples()];
    ir[0] = 1.0;
    ir_processor.process(&mut [ir.as_mut_slice()], controls);

    let latency = ir_processor.latency_samples();
    let fft_len = ir.len().next_power_of_two();
    let gd = group_delay(&ir, fft_len);
    let bin = ((controls.frequency / sample_rate) * fft_len as f32).round() as usize;
    let gd_center = gd.get(bin).copied().unwrap_or(0.0);

    println!("Impulse analysis:");
    println!("  latency          : {} samples", latency);
    println!(
        "  group delay @ fc : {:.1} samples ({:.2} ms)",
        gd_center,
        1000.0 * gd_center / sample_rate
    );
    if !controls.reverse {
        println!(
            "  magnitude ripple : {:.4} dB",
            max_magnitude_deviation_db(&ir, fft_len)
        );
    }
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let input = args.next().map(PathBuf::from).unwrap_or_else(|| usage());
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| usage());
    let settings = match args.next().map(PathBuf::from) {
        Some(path) => DisperserSettings::from_file(&path)?,
        None => DisperserSettings::default(),
    };
    let controls = settings.to_controls();

    let (mut channels, sample_rate) = read_channels(&input)?;
    let sr = sample_rate as f32;
    let in_peak = channels.iter().map(|c| peak_abs(c)).fold(0.0f32, f32::max);
    let in_rms = channels.first().map(|c| frame_rms(c)).unwrap_or(0.0);

    let processor = render(&mut channels, sr, &controls);

    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(&output, spec)
        .with_context(|| format!("failed to create output WAV '{}'", output.display()))?;
    let frames = channels.first().map(|c| c.len()).unwrap_or(0);
    for i in 0..frames {
        for ch in channels.iter() {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize().context("failed to finalize output WAV")?;

    let out_peak = channels.iter().map(|c| peak_abs(c)).fold(0.0f32, f32::max);
    let out_rms = channels.first().map(|c| frame_rms(c)).unwrap_or(0.0);

    println!("Render summary for '{}':", input.display());
    println!(
        "  settings         : freq={:.1}Hz shape={:.2} stages={} series={} reverse={} inv={}",
        controls.frequency,
        controls.shape,
        controls.stages,
        controls.chains,
        controls.reverse,
        controls.invert
    );
    println!("  frames processed : {}", frames);
    println!("  peak in / out    : {:.4} / {:.4}", in_peak, out_peak);
    println!("  rms in / out     : {:.4} / {:.4}", in_rms, out_rms);
    println!("  output latency   : {} samples", processor.latency_samples());
    impulse_report(sr, &controls);
    Ok(())
}
