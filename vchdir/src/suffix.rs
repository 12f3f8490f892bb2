//! Choosing a compression program from an archive name.

struct CompressionSuffix {
    suffix: &'static str,
    program: &'static str,
}

const COMPRESSION_SUFFIXES: &[CompressionSuffix] = &[
    CompressionSuffix { suffix: "gz", program: "gzip" },
    CompressionSuffix { suffix: "tgz", program: "gzip" },
    CompressionSuffix { suffix: "taz", program: "gzip" },
    CompressionSuffix { suffix: "Z", program: "compress" },
    CompressionSuffix { suffix: "taZ", program: "compress" },
    CompressionSuffix { suffix: "bz2", program: "bzip2" },
    CompressionSuffix { suffix: "tbz", program: "bzip2" },
    CompressionSuffix { suffix: "tbz2", program: "bzip2" },
    CompressionSuffix { suffix: "tz2", program: "bzip2" },
    CompressionSuffix { suffix: "lzma", program: "lzma" },
    CompressionSuffix { suffix: "tlz", program: "lzma" },
    CompressionSuffix { suffix: "lzo", program: "lzop" },
    CompressionSuffix { suffix: "xz", program: "xz" },
];

/// The compression program implied by the suffix of `name`, else `default`.
/// Suffixes are case sensitive.
pub fn compression_program<'a>(name: &str, default: Option<&'a str>) -> Option<&'a str> {
    let Some((_, suffix)) = name.rsplit_once('.') else {
        return default;
    };
    COMPRESSION_SUFFIXES
        .iter()
        .find(|entry| entry.suffix == suffix)
        .map_or(default, |entry| Some(entry.program))
}
