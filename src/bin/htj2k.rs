//! htj2k CLI - encode, decode and inspect stripe-transfer HTJ2K codestreams.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use htj2k_stripe::codestream::{Codestream, Coords, ParseMode, ProgressionOrder, ReferenceCodestream, ThreadEnv};
use htj2k_stripe::stripe::{Acceleration, DecompressorOptions, StripeBufMut, StripeDecompressor, StripeLayout};
use htj2k_stripe::{FrameDescriptor, Htj2kDecoder, Htj2kEncoder};

/// Stripe-wise HTJ2K codec
#[derive(Parser)]
#[command(name = "htj2k")]
#[command(author = "htj2k-stripe contributors")]
#[command(version)]
#[command(about = "Encode, decode and inspect HTJ2K codestreams stripe by stripe", long_about = None)]
#[command(after_help = "EXAMPLES:
    htj2k encode -i pixels.raw -o image.j2c -w 512 -H 512 -b 16 --signed
    htj2k decode -i image.j2c -o pixels.raw --level 1
    htj2k info -i image.j2c
    htj2k bench -i image.j2c --threads 4")]
struct Cli {
    /// Log filter, e.g. debug or htj2k_stripe=trace
    #[arg(long, global = true, default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode raw interleaved samples into a codestream
    ///
    /// Samples of up to 8 bits are one byte each, wider samples native-endian 16-bit words.
    #[command(visible_alias = "e")]
    Encode {
        #[arg(short, long, help = "Path to raw sample data")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the encoded codestream")]
        output: PathBuf,

        #[arg(short, long)]
        width: u32,

        #[arg(short = 'H', long)]
        height: u32,

        /// Number of components (1 or 3)
        #[arg(short = 'n', long, default_value = "1")]
        components: u8,

        #[arg(short, long, default_value = "8")]
        bits: u8,

        #[arg(long)]
        signed: bool,

        /// Lossy coding with this quantisation step
        #[arg(short, long)]
        quantization_step: Option<f32>,

        #[arg(short, long, default_value = "5")]
        decompositions: u8,

        #[arg(long, default_value = "rpcl", value_enum)]
        progression: Progression,

        /// Tile size as WxH, the whole image when omitted
        #[arg(long, value_parser = parse_size)]
        tile: Option<Coords>,

        /// Apply the multi-component transform (3 components only)
        #[arg(long)]
        color_transform: bool,

        #[arg(short, long, default_value = "1")]
        threads: usize,
    },

    /// Decode a codestream to raw interleaved samples
    #[command(visible_alias = "d")]
    Decode {
        #[arg(short, long, help = "Path to the codestream")]
        input: PathBuf,

        #[arg(short, long, help = "Path for the raw samples")]
        output: PathBuf,

        /// Resolution levels to discard
        #[arg(short, long, default_value = "0")]
        level: usize,

        #[arg(short, long, default_value = "1")]
        threads: usize,
    },

    /// Display codestream header information
    #[command(visible_alias = "i")]
    Info {
        #[arg(short, long, help = "Path to the codestream to inspect")]
        input: PathBuf,
    },

    /// Time stripe-wise decoding with both transfer kernels
    Bench {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long, default_value = "1")]
        threads: usize,

        #[arg(long, default_value = "10")]
        iterations: usize,

        /// Stripe height in rows
        #[arg(long, default_value = "16")]
        stripe_height: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Progression {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl From<Progression> for ProgressionOrder {
    fn from(p: Progression) -> Self {
        match p {
            Progression::Lrcp => ProgressionOrder::Lrcp,
            Progression::Rlcp => ProgressionOrder::Rlcp,
            Progression::Rpcl => ProgressionOrder::Rpcl,
            Progression::Pcrl => ProgressionOrder::Pcrl,
            Progression::Cprl => ProgressionOrder::Cprl,
        }
    }
}

fn parse_size(s: &str) -> Result<Coords, String> {
    let (w, h) = s.split_once('x').ok_or_else(|| format!("expected WxH, got {s}"))?;
    let w = w.parse().map_err(|_| format!("bad width in {s}"))?;
    let h = h.parse().map_err(|_| format!("bad height in {s}"))?;
    Ok(Coords::new(w, h))
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log.as_str())).init();

    let result = match cli.command {
        Commands::Encode {
            input,
            output,
            width,
            height,
            components,
            bits,
            signed,
            quantization_step,
            decompositions,
            progression,
            tile,
            color_transform,
            threads,
        } => {
            let settings = EncodeSettings {
                quantization_step,
                decompositions,
                progression,
                tile,
                color_transform,
                threads,
            };
            FrameDescriptor::new(width, height, components, bits, signed)
                .map_err(Into::into)
                .and_then(|frame| encode_image(&input, &output, frame, &settings))
        }
        Commands::Decode {
            input,
            output,
            level,
            threads,
        } => decode_image(&input, &output, level, threads),
        Commands::Info { input } => show_info(&input),
        Commands::Bench {
            input,
            threads,
            iterations,
            stripe_height,
        } => bench(&input, threads, iterations, stripe_height),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct EncodeSettings {
    quantization_step: Option<f32>,
    decompositions: u8,
    progression: Progression,
    tile: Option<Coords>,
    color_transform: bool,
    threads: usize,
}

fn encode_image(
    input: &PathBuf,
    output: &PathBuf,
    frame: FrameDescriptor,
    settings: &EncodeSettings,
) -> Result<(), Box<dyn std::error::Error>> {
    let pixels = fs::read(input)?;
    let mut encoder = Htj2kEncoder::new();
    let buffer = encoder.decoded_buffer_mut(frame)?;
    if pixels.len() != buffer.len() {
        return Err(format!("expected {} bytes of samples, found {}", buffer.len(), pixels.len()).into());
    }
    buffer.copy_from_slice(&pixels);

    encoder.set_decompositions(settings.decompositions);
    match settings.quantization_step {
        Some(step) => encoder.set_quality(false, step),
        None => encoder.set_quality(true, 0.0),
    }
    encoder.set_progression_order(settings.progression.into());
    if let Some(tile) = settings.tile {
        encoder.set_tile_size(tile);
    }
    encoder.set_is_using_color_transform(settings.color_transform);
    encoder.set_num_threads(settings.threads);

    let start = Instant::now();
    encoder.encode()?;
    fs::write(output, encoder.encoded_bytes())?;
    println!(
        "✓ Encoded {}x{} image ({} components) to {:?}: {} bytes in {:?}",
        frame.width,
        frame.height,
        frame.component_count,
        output,
        encoder.encoded_bytes().len(),
        start.elapsed()
    );
    Ok(())
}

fn decode_image(
    input: &PathBuf,
    output: &PathBuf,
    level: usize,
    threads: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;
    let mut decoder = Htj2kDecoder::new();
    decoder.set_encoded(data);
    decoder.set_num_threads(threads)?;
    decoder.decode_sub_resolution(level)?;
    fs::write(output, decoder.decoded_bytes())?;

    let frame = decoder.frame_descriptor()?;
    let size = decoder.size_at_decomposition_level(level)?;
    if let Some(coercion) = decoder.component_coercion() {
        println!("Note: component count coerced ({:?})", coercion);
    }
    println!(
        "✓ Decoded {}x{} image ({} components, {} bits) to {:?}",
        size.x, size.y, frame.component_count, frame.bits_per_sample, output
    );
    Ok(())
}

fn show_info(input: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let data = fs::read(input)?;

    println!("File: {:?}", input);
    println!("Size: {} bytes", data.len());
    println!();

    // Resilient parsing lists what it can even for damaged streams.
    let codestream = ReferenceCodestream::open(data.clone(), ParseMode::Resilient)?;
    let siz = codestream.siz();
    let cod = codestream.cod();
    let extent = siz.image_rect();
    let grid = siz.tile_grid();
    println!("Format: HTJ2K Codestream");
    println!("  Dimensions:  {}x{}", extent.size.x, extent.size.y);
    println!("  Offset:      {},{}", siz.image_offset.x, siz.image_offset.y);
    println!("  Components:  {}", siz.components.len());
    for (c, info) in siz.components.iter().enumerate() {
        println!(
            "    [{}] {} bits {}, sub-sampling {}x{}",
            c,
            info.precision,
            if info.signed { "signed" } else { "unsigned" },
            info.sub_x,
            info.sub_y
        );
    }
    println!(
        "  Tiles:       {}x{} of {}x{}",
        grid.x, grid.y, siz.tile_size.x, siz.tile_size.y
    );
    println!("  DWT levels:  {}", cod.decomposition_levels);
    println!("  Reversible:  {}", cod.reversible);
    println!("  Layers:      {}", cod.num_layers);
    println!("  Progression: {:?}", cod.progression_order);
    println!("  Blocks:      {}x{}", cod.block_width, cod.block_height);
    println!("  MCT:         {}", cod.use_color_transform);

    let mut decoder = Htj2kDecoder::new();
    decoder.set_encoded(data);
    match decoder.read_header() {
        Ok(frame) => {
            println!();
            println!(
                "Delivered frame: {}x{}, {} components, {} bits{}",
                frame.width,
                frame.height,
                frame.component_count,
                frame.bits_per_sample,
                if frame.is_signed { " signed" } else { "" }
            );
            if let Some(coercion) = decoder.component_coercion() {
                println!("  Coercion: {:?}", coercion);
            }
        }
        Err(e) => println!("Strict header check failed: {}", e),
    }
    Ok(())
}

fn bench(
    input: &PathBuf,
    threads: usize,
    iterations: usize,
    stripe_height: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let data: Arc<[u8]> = fs::read(input)?.into();
    let env = if threads > 1 {
        Some(ThreadEnv::new(threads)?)
    } else {
        None
    };
    println!("Benchmarking stripe decode of {:?} ({} threads)...", input, threads.max(1));

    let mut results = Vec::new();
    for acceleration in [Acceleration::ScalarOnly, Acceleration::Auto] {
        let mut checksum = 0u64;
        let start = Instant::now();
        for _ in 0..iterations {
            let codestream = ReferenceCodestream::open(Arc::clone(&data), ParseMode::Fussy)?;
            let widths = (0..codestream.num_components())
                .map(|c| codestream.component_geometry(c).map(|g| g.dims.size.x as usize))
                .collect::<Result<Vec<_>, _>>()?;
            let mut decompressor = StripeDecompressor::new(DecompressorOptions {
                env: env.clone(),
                acceleration,
            });
            decompressor.start(codestream)?;
            loop {
                let heights = decompressor.stripe_heights_for_rows(stripe_height.max(1))?;
                let samples: usize = widths.iter().zip(&heights).map(|(w, h)| w * h).sum();
                let mut stripe = vec![0i16; samples];
                let layout = StripeLayout::planar(&widths, &heights);
                let more = decompressor.pull_stripe(StripeBufMut::Int16(&mut stripe), &heights, Some(&layout))?;
                checksum = stripe
                    .iter()
                    .fold(checksum, |acc, &v| acc.wrapping_mul(31).wrapping_add(v as u16 as u64));
                if !more {
                    break;
                }
            }
            decompressor.finish()?;
        }
        let elapsed = start.elapsed();
        println!(
            "{:?}: {:?} for {} iterations (checksum {:#x})",
            acceleration, elapsed, iterations, checksum
        );
        results.push((elapsed, checksum));
    }

    let speedup = results[0].0.as_secs_f64() / results[1].0.as_secs_f64().max(f64::EPSILON);
    println!("Speedup: {:.2}x", speedup);
    if results[0].1 == results[1].1 {
        println!("Output: IDENTICAL");
    } else {
        println!("Output: MISMATCH");
    }
    Ok(())
}
