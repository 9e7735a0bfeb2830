use zwire_frame::try_parse;

use crate::cmd::DecodeArgs;
use crate::exit::{CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{parse_hex, print_decoded, Decoded, OutputFormat};

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let bytes = parse_hex(&args.hex.join(" ")).map_err(|err| CliError::new(USAGE, err))?;
    let (frames, trailing) = decode_all(&bytes);
    print_decoded(&frames, trailing, format);

    let corrupt = frames.iter().any(|decoded| match &decoded.frame {
        zwire_frame::Frame::Data(data) => !data.checksum_valid(),
        _ => false,
    });
    Ok(if corrupt { DATA_INVALID } else { SUCCESS })
}

/// Every frame in `bytes`, plus the length of an incomplete tail.
pub fn decode_all(bytes: &[u8]) -> (Vec<Decoded>, usize) {
    let mut frames = Vec::new();
    let mut offset = 0;
    loop {
        let parsed = try_parse(&bytes[offset..]);
        let start = offset + parsed.skipped;
        offset += parsed.consumed;
        match parsed.frame {
            Some(frame) => frames.push(Decoded {
                offset: start,
                skipped: parsed.skipped,
                frame,
            }),
            None => break,
        }
    }
    (frames, bytes.len() - offset)
}
