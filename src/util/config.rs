use std::sync::OnceLock;

use log::LevelFilter;

/// Environment variable naming the optional config file.
pub const CONFIG_ENV: &str = "GLPATH_CONFIG";

/// Highest accepted oversampling level (`level²` passes per draw).
pub const MAX_OVERSAMPLING_LEVEL: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderConfig {
    /// Square root of the number of jittered passes used by `TriangulatedPath::draw_default`.
    pub oversampling_level: u32,
    /// Triangles per mesh block.
    pub block_capacity: usize,
    /// Surfaces with more pixels than this go through a temporary framebuffer.
    pub direct_upload_max_pixels: u32,
    /// Round texture allocations up to powers of two even when the device has NPOT support.
    pub force_power_of_two: bool,
    pub log_level: LevelFilter,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            oversampling_level: 4,
            block_capacity: 256,
            direct_upload_max_pixels: 1 << 20,
            force_power_of_two: false,
            log_level: LevelFilter::Info,
        }
    }
}

static CONFIG: OnceLock<RenderConfig> = OnceLock::new();

pub fn render_config() -> &'static RenderConfig {
    CONFIG.get_or_init(read_config)
}

fn read_config() -> RenderConfig {
    let path = match std::env::var(CONFIG_ENV) {
        Ok(path) if !path.trim().is_empty() => path,
        _ => return RenderConfig::default(),
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_config(&text),
        Err(err) => {
            log::warn!("config: could not read {path}: {err}; using defaults");
            RenderConfig::default()
        }
    }
}

/// Parse `key = value` lines on top of the defaults.
pub fn parse_config(text: &str) -> RenderConfig {
    let mut cfg = RenderConfig::default();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let value = parts.next().unwrap_or("").trim();

        let ok = match key.as_str() {
            "oversampling_level" => match value.parse::<u32>() {
                Ok(n) if n <= MAX_OVERSAMPLING_LEVEL => {
                    cfg.oversampling_level = n;
                    true
                }
                _ => false,
            },
            "block_capacity" => match value.parse::<usize>() {
                Ok(n) if n > 0 => {
                    cfg.block_capacity = n;
                    true
                }
                _ => false,
            },
            "direct_upload_max_pixels" => parse_into(value, &mut cfg.direct_upload_max_pixels),
            "force_power_of_two" => {
                cfg.force_power_of_two = parse_bool(value);
                true
            }
            "log_level" => parse_into(value, &mut cfg.log_level),
            _ => {
                log::warn!("config: unknown key {key:?}");
                true
            }
        };
        if !ok {
            log::warn!("config: bad value {value:?} for {key}; keeping default");
        }
    }

    cfg
}

fn parse_into<T: std::str::FromStr>(value: &str, slot: &mut T) -> bool {
    match value.parse::<T>() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_defaults() {
        assert_eq!(parse_config(""), RenderConfig::default());
    }

    #[test]
    fn parses_known_keys() {
        let cfg = parse_config(
            "# tuning\n\
             oversampling_level = 3\n\
             BLOCK_CAPACITY=64\n\
             direct_upload_max_pixels = 4096\n\
             force_power_of_two = YES\n\
             log_level = debug\n",
        );
        assert_eq!(cfg.oversampling_level, 3);
        assert_eq!(cfg.block_capacity, 64);
        assert_eq!(cfg.direct_upload_max_pixels, 4096);
        assert!(cfg.force_power_of_two);
        assert_eq!(cfg.log_level, LevelFilter::Debug);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let cfg = parse_config("oversampling_level = lots\nblock_capacity = 0\nnonsense\n");
        assert_eq!(cfg.oversampling_level, 4);
        assert_eq!(cfg.block_capacity, 256);
    }

    #[test]
    fn oversampling_level_is_range_checked() {
        assert_eq!(parse_config("oversampling_level = 70000").oversampling_level, 4);
        assert_eq!(parse_config("oversampling_level = 17").oversampling_level, 4);
        assert_eq!(parse_config("oversampling_level = 16").oversampling_level, MAX_OVERSAMPLING_LEVEL);
    }
}
