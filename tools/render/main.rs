use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::path::PathBuf;
use xover_dyn::dsp::response::crossover_response;
use xover_dyn::{ChannelProcessor, ProcessorConfig};

const BLOCK_SIZE: usize = 512;
const RESPONSE_FFT_LEN: usize = 65_536;
// Octave band centres reported by --response
const OCTAVE_CENTRES_HZ: [f32; 10] = [
    31.5, 63.0, 125.0, 250.0, 500.0, 1000.0, 2000.0, 4000.0, 8000.0, 16000.0,
];

const USAGE: &str = "usage: xover_render <in.wav> <out.wav> [config.json] [--response]";

struct Args {
    input: PathBuf,
    output: PathBuf,
    config: Option<PathBuf>,
    response: bool,
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut response = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--response" => response = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    let mut it = positional.into_iter();
    let (Some(input), Some(output)) = (it.next(), it.next()) else {
        bail!("{USAGE}");
    };
    Ok(Args {
        input,
        output,
        config: it.next(),
        response,
    })
}

/// Read every channel of a WAV as de-interleaved f32 in [-1, 1].
fn read_channels(path: &PathBuf) -> Result<(WavSpec, Vec<Vec<f32>>)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("failed to open input WAV '{}'", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok((spec, deinterleave(&interleaved, channels)))
}

fn deinterleave(interleaved: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = interleaved.len() / channels;
    let mut out: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for frame in interleaved.chunks_exact(channels) {
        for (ch, &s) in frame.iter().enumerate() {
            out[ch].push(s);
        }
    }
    out
}

fn write_channels(path: &PathBuf, sample_rate: u32, channels: &[Vec<f32>]) -> Result<()> {
    let spec = WavSpec {
        channels: channels.len() as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create output WAV '{}'", path.display()))?;
    let frames = channels.first().map_or(0, Vec::len);
    for i in 0..frames {
        for ch in channels {
            writer.write_sample(ch[i])?;
        }
    }
    writer.finalize()?;
    Ok(())
}

fn print_response(config: &ProcessorConfig, sample_rate: f32) -> Result<()> {
    let resp = crossover_response(
        &config.crossovers_hz,
        config.linkwitz_riley,
        sample_rate,
        RESPONSE_FFT_LEN,
    )?;
    println!("Summed crossover response (compressors bypassed):");
    for &hz in OCTAVE_CENTRES_HZ.iter().filter(|&&hz| hz < sample_rate / 2.0) {
        println!("  {:>8.1} Hz : {:+.3} dB", hz, resp.magnitude_db_at(hz));
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => ProcessorConfig::from_path(path)
            .with_context(|| format!("failed to load config '{}'", path.display()))?,
        None => ProcessorConfig::default(),
    };

    let (spec, mut channels) = read_channels(&args.input)?;
    if channels.is_empty() {
        bail!("'{}' has no channels", args.input.display());
    }
    let sample_rate = spec.sample_rate as f32;

    let mut processor = ChannelProcessor::new();
    processor.prepare_with_config(channels.len(), BLOCK_SIZE, sample_rate, &config)?;
    let meters = processor.meters();

    let frames = channels[0].len();
    let mut peak_in = 0.0f32;
    let mut peak_out = 0.0f32;
    let mut max_gr = vec![0.0f32; processor.num_bands()];
    for start in (0..frames).step_by(BLOCK_SIZE) {
        let end = (start + BLOCK_SIZE).min(frames);
        let mut block: Vec<&mut [f32]> = channels.iter_mut().map(|c| &mut c[start..end]).collect();
        processor.process_block(&mut block)?;

        peak_in = peak_in.max(meters.get_input_peak());
        peak_out = peak_out.max(meters.get_output_peak());
        for (band, gr) in max_gr.iter_mut().enumerate() {
            *gr = gr.max(meters.get_gain_reduction_db(band));
        }
    }

    write_channels(&args.output, spec.sample_rate, &channels)?;

    println!(
        "Rendered '{}' -> '{}'",
        args.input.display(),
        args.output.display()
    );
    println!("  frames           : {}", frames);
    println!("  channels         : {}", channels.len());
    println!("  crossovers (Hz)  : {:?}", processor.crossovers_hz());
    println!("  input peak       : {:.4}", peak_in);
    println!("  output peak      : {:.4}", peak_out);
    for (band, gr) in max_gr.iter().enumerate() {
        println!("  band {} max GR    : {:.2} dB", band + 1, gr);
    }

    if args.response {
        print_response(&config, sample_rate)?;
    }
    Ok(())
}
