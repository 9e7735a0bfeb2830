use std::fmt::Write as _;
use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use zwire_frame::{DataFrame, Frame, MessageType};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct FrameOutput {
    kind: &'static str,
    message_type: String,
    function: u8,
    function_name: &'static str,
    parameters: String,
    checksum_valid: bool,
    timestamp: String,
}

impl FrameOutput {
    fn new(frame: &DataFrame) -> Self {
        Self {
            kind: "data",
            message_type: message_type_name(frame.message_type()),
            function: frame.function().into(),
            function_name: frame.function().name(),
            parameters: hex(frame.parameters()),
            checksum_valid: frame.checksum_valid(),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_frame(frame: &DataFrame, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&FrameOutput::new(frame)),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["TYPE", "FUNCTION", "PARAMETERS", "CHECKSUM"])
                .add_row(frame_row(frame));
            println!("{table}");
        }
        OutputFormat::Pretty => println!("{}", pretty(frame)),
    }
}

/// One frame found while decoding a byte string.
pub struct Decoded {
    pub offset: usize,
    pub skipped: usize,
    pub frame: Frame,
}

#[derive(Serialize)]
struct DecodedOutput {
    offset: usize,
    skipped: usize,
    #[serde(flatten)]
    frame: DecodedFrame,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum DecodedFrame {
    Ack,
    Nak,
    Can,
    Data {
        message_type: String,
        function: u8,
        function_name: &'static str,
        parameters: String,
        checksum_valid: bool,
    },
}

impl From<&Frame> for DecodedFrame {
    fn from(frame: &Frame) -> Self {
        match frame {
            Frame::Ack => DecodedFrame::Ack,
            Frame::Nak => DecodedFrame::Nak,
            Frame::Can => DecodedFrame::Can,
            Frame::Data(data) => DecodedFrame::Data {
                message_type: message_type_name(data.message_type()),
                function: data.function().into(),
                function_name: data.function().name(),
                parameters: hex(data.parameters()),
                checksum_valid: data.checksum_valid(),
            },
        }
    }
}

#[derive(Serialize)]
struct DecodeSummary {
    frames: Vec<DecodedOutput>,
    skipped_bytes: usize,
    trailing_bytes: usize,
}

pub fn print_decoded(frames: &[Decoded], trailing: usize, format: OutputFormat) {
    let skipped_bytes = frames.iter().map(|decoded| decoded.skipped).sum();
    match format {
        OutputFormat::Json => print_json(&DecodeSummary {
            frames: frames
                .iter()
                .map(|decoded| DecodedOutput {
                    offset: decoded.offset,
                    skipped: decoded.skipped,
                    frame: DecodedFrame::from(&decoded.frame),
                })
                .collect(),
            skipped_bytes,
            trailing_bytes: trailing,
        }),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["OFFSET", "SKIPPED", "FRAME", "PARAMETERS", "CHECKSUM"]);
            for decoded in frames {
                let (frame, parameters, checksum) = match &decoded.frame {
                    Frame::Data(data) => (
                        format!("{} {}", message_type_name(data.message_type()), data.function()),
                        hex(data.parameters()),
                        checksum_label(data.checksum_valid()).to_string(),
                    ),
                    control => (control_name(control).to_string(), String::new(), String::new()),
                };
                table.add_row(vec![
                    decoded.offset.to_string(),
                    decoded.skipped.to_string(),
                    frame,
                    parameters,
                    checksum,
                ]);
            }
            println!("{table}");
            println!("skipped={skipped_bytes} trailing={trailing}");
        }
        OutputFormat::Pretty => {
            for decoded in frames {
                let frame = match &decoded.frame {
                    Frame::Data(data) => pretty(data),
                    control => control_name(control).to_string(),
                };
                println!("@{} (+{} skipped) {frame}", decoded.offset, decoded.skipped);
            }
            println!("skipped={skipped_bytes} trailing={trailing}");
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn frame_row(frame: &DataFrame) -> Vec<String> {
    vec![
        message_type_name(frame.message_type()),
        frame.function().to_string(),
        hex(frame.parameters()),
        checksum_label(frame.checksum_valid()).to_string(),
    ]
}

fn pretty(frame: &DataFrame) -> String {
    format!(
        "{} {} params=[{}] checksum={}",
        message_type_name(frame.message_type()),
        frame.function(),
        hex(frame.parameters()),
        checksum_label(frame.checksum_valid())
    )
}

fn control_name(frame: &Frame) -> &'static str {
    match frame {
        Frame::Ack => "ACK",
        Frame::Nak => "NAK",
        Frame::Can => "CAN",
        Frame::Data(_) => "DATA",
    }
}

fn checksum_label(valid: bool) -> &'static str {
    if valid {
        "ok"
    } else {
        "BAD"
    }
}

fn message_type_name(message_type: MessageType) -> String {
    match message_type {
        MessageType::Request => "REQ".to_string(),
        MessageType::Response => "RES".to_string(),
        MessageType::Unknown(byte) => format!("0x{byte:02X}"),
    }
}

/// Space-separated upper-case hex.
pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, byte) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Parse hex bytes, ignoring whitespace, `:`, `,` and `0x` prefixes.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let mut digits = String::with_capacity(input.len());
    for token in input.split(|c: char| c.is_whitespace() || c == ':' || c == ',') {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if !token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid hex byte {token:?}"));
        }
        if token.len() > 1 && token.len() % 2 != 0 {
            return Err(format!("odd number of hex digits in {token:?}"));
        }
        if token.len() == 1 {
            digits.push('0');
        }
        digits.push_str(token);
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            let pair = &digits[i..i + 2];
            u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte {pair:?}"))
        })
        .collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
