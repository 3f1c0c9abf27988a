//! CSS `filter` parsing and CPU application.

use image::RgbaImage;

/// A single filter function.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterFn {
    /// Gaussian blur, standard deviation in pixels.
    Blur(f32),
    Brightness(f32),
    Contrast(f32),
    Grayscale(f32),
    /// Rotation in degrees.
    HueRotate(f32),
    Invert(f32),
    Opacity(f32),
    Saturate(f32),
    Sepia(f32),
    /// A syntactically valid function the CPU path cannot render
    /// (`drop-shadow`, `url`).
    Other { name: String, args: String },
}

impl FilterFn {
    pub fn name(&self) -> &str {
        match self {
            Self::Blur(_) => "blur",
            Self::Brightness(_) => "brightness",
            Self::Contrast(_) => "contrast",
            Self::Grayscale(_) => "grayscale",
            Self::HueRotate(_) => "hue-rotate",
            Self::Invert(_) => "invert",
            Self::Opacity(_) => "opacity",
            Self::Saturate(_) => "saturate",
            Self::Sepia(_) => "sepia",
            Self::Other { name, .. } => name,
        }
    }
}

/// Errors from parsing a filter declaration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterParseError {
    #[error("expected filter function at offset {0}")]
    ExpectedFunction(usize),
    #[error("unterminated argument list for {0}")]
    Unterminated(String),
    #[error("invalid argument {arg:?} for {name}")]
    InvalidArgument { name: String, arg: String },
}

/// An ordered list of filter functions; empty means `none`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    functions: Vec<FilterFn>,
}

impl FilterChain {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_functions(functions: Vec<FilterFn>) -> Self {
        Self { functions }
    }

    pub fn is_none(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn functions(&self) -> &[FilterFn] {
        &self.functions
    }

    /// Parse a CSS filter value such as `brightness(1.2) blur(2px)`.
    pub fn parse(value: &str) -> Result<Self, FilterParseError> {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            return Ok(Self::none());
        }

        let bytes = value.as_bytes();
        let mut functions = Vec::new();
        let mut pos = 0;
        while pos < bytes.len() {
            if bytes[pos].is_ascii_whitespace() {
                pos += 1;
                continue;
            }
            let name_start = pos;
            while pos < bytes.len() && (bytes[pos].is_ascii_alphabetic() || bytes[pos] == b'-') {
                pos += 1;
            }
            if pos == name_start || pos >= bytes.len() || bytes[pos] != b'(' {
                return Err(FilterParseError::ExpectedFunction(name_start));
            }
            let name = value[name_start..pos].to_ascii_lowercase();
            pos += 1;

            let args_start = pos;
            let mut depth = 1;
            while pos < bytes.len() {
                match bytes[pos] {
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                pos += 1;
            }
            if depth != 0 {
                return Err(FilterParseError::Unterminated(name));
            }
            let args = value[args_start..pos].trim();
            pos += 1;

            functions.push(parse_function(&name, args)?);
        }

        Ok(Self { functions })
    }
}

fn parse_function(name: &str, args: &str) -> Result<FilterFn, FilterParseError> {
    let invalid = || FilterParseError::InvalidArgument {
        name: name.to_string(),
        arg: args.to_string(),
    };
    let amount = |default: f32| -> Result<f32, FilterParseError> {
        if args.is_empty() {
            return Ok(default);
        }
        let v = parse_number_or_percent(args).ok_or_else(invalid)?;
        if v < 0.0 {
            return Err(invalid());
        }
        Ok(v)
    };

    let function = match name {
        "blur" => {
            if args.is_empty() {
                FilterFn::Blur(0.0)
            } else {
                let px = parse_length_px(args).ok_or_else(invalid)?;
                if px < 0.0 {
                    return Err(invalid());
                }
                FilterFn::Blur(px)
            }
        }
        "brightness" => FilterFn::Brightness(amount(1.0)?),
        "contrast" => FilterFn::Contrast(amount(1.0)?),
        "grayscale" => FilterFn::Grayscale(amount(1.0)?.min(1.0)),
        "invert" => FilterFn::Invert(amount(1.0)?.min(1.0)),
        "opacity" => FilterFn::Opacity(amount(1.0)?.min(1.0)),
        "saturate" => FilterFn::Saturate(amount(1.0)?),
        "sepia" => FilterFn::Sepia(amount(1.0)?.min(1.0)),
        "hue-rotate" => {
            if args.is_empty() {
                FilterFn::HueRotate(0.0)
            } else {
                FilterFn::HueRotate(parse_angle_deg(args).ok_or_else(invalid)?)
            }
        }
        "drop-shadow" | "url" => FilterFn::Other {
            name: name.to_string(),
            args: args.to_string(),
        },
        _ => return Err(invalid()),
    };
    Ok(function)
}

fn parse_number_or_percent(arg: &str) -> Option<f32> {
    let value = match arg.strip_suffix('%') {
        Some(pct) => pct.trim().parse::<f32>().ok().map(|v| v / 100.0),
        None => arg.parse::<f32>().ok(),
    };
    value.filter(|v| v.is_finite())
}

fn parse_length_px(arg: &str) -> Option<f32> {
    let number = arg.strip_suffix("px").unwrap_or(arg).trim();
    // Unitless lengths are only valid for zero.
    let v = number.parse::<f32>().ok().filter(|v| v.is_finite())?;
    if !arg.ends_with("px") && v != 0.0 {
        return None;
    }
    Some(v)
}

fn parse_angle_deg(arg: &str) -> Option<f32> {
    let (number, scale) = if let Some(n) = arg.strip_suffix("deg") {
        (n, 1.0)
    } else if let Some(n) = arg.strip_suffix("grad") {
        (n, 0.9)
    } else if let Some(n) = arg.strip_suffix("rad") {
        (n, 180.0 / std::f32::consts::PI)
    } else if let Some(n) = arg.strip_suffix("turn") {
        (n, 360.0)
    } else {
        (arg, 1.0)
    };
    let v = number.trim().parse::<f32>().ok().filter(|v| v.is_finite())?;
    if scale == 1.0 && !arg.ends_with("deg") && v != 0.0 {
        return None;
    }
    Some(v * scale)
}

/// Whether the CPU path can render every function in `chain`.
pub fn cpu_supports(chain: &FilterChain) -> Result<(), &FilterFn> {
    match chain
        .functions()
        .iter()
        .find(|f| matches!(f, FilterFn::Other { .. }))
    {
        Some(f) => Err(f),
        None => Ok(()),
    }
}

/// Apply `chain` to `img` in order. Unsupported functions are skipped.
pub fn apply_filters(img: &mut RgbaImage, chain: &FilterChain) {
    for function in chain.functions() {
        match *function {
            FilterFn::Blur(sigma) => {
                if sigma > 0.0 {
                    *img = image::imageops::blur(&*img, sigma);
                }
            }
            FilterFn::Opacity(a) => {
                for px in img.pixels_mut() {
                    px.0[3] = (f32::from(px.0[3]) * a).round() as u8;
                }
            }
            FilterFn::Other { .. } => {}
            ref f => {
                let op = ColorOp::from_filter(f);
                for px in img.pixels_mut() {
                    let rgb = op.apply([
                        f32::from(px.0[0]) / 255.0,
                        f32::from(px.0[1]) / 255.0,
                        f32::from(px.0[2]) / 255.0,
                    ]);
                    for (i, v) in rgb.into_iter().enumerate() {
                        px.0[i] = (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                    }
                }
            }
        }
    }
}

/// Per-pixel color transfer for the color-only filter functions.
enum ColorOp {
    Matrix([[f32; 3]; 3]),
    Linear { slope: f32, intercept: f32 },
    Invert(f32),
}

impl ColorOp {
    fn from_filter(f: &FilterFn) -> Self {
        match *f {
            FilterFn::Brightness(b) => Self::Linear {
                slope: b,
                intercept: 0.0,
            },
            FilterFn::Contrast(c) => Self::Linear {
                slope: c,
                intercept: 0.5 - 0.5 * c,
            },
            FilterFn::Invert(a) => Self::Invert(a),
            FilterFn::Grayscale(a) => {
                let g = 1.0 - a;
                Self::Matrix([
                    [0.2126 + 0.7874 * g, 0.7152 - 0.7152 * g, 0.0722 - 0.0722 * g],
                    [0.2126 - 0.2126 * g, 0.7152 + 0.2848 * g, 0.0722 - 0.0722 * g],
                    [0.2126 - 0.2126 * g, 0.7152 - 0.7152 * g, 0.0722 + 0.9278 * g],
                ])
            }
            FilterFn::Sepia(a) => {
                let g = 1.0 - a;
                Self::Matrix([
                    [0.393 + 0.607 * g, 0.769 - 0.769 * g, 0.189 - 0.189 * g],
                    [0.349 - 0.349 * g, 0.686 + 0.314 * g, 0.168 - 0.168 * g],
                    [0.272 - 0.272 * g, 0.534 - 0.534 * g, 0.131 + 0.869 * g],
                ])
            }
            FilterFn::Saturate(s) => Self::Matrix([
                [0.213 + 0.787 * s, 0.715 - 0.715 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 + 0.285 * s, 0.072 - 0.072 * s],
                [0.213 - 0.213 * s, 0.715 - 0.715 * s, 0.072 + 0.928 * s],
            ]),
            FilterFn::HueRotate(deg) => {
                let (sin, cos) = deg.to_radians().sin_cos();
                Self::Matrix([
                    [
                        0.213 + cos * 0.787 - sin * 0.213,
                        0.715 - cos * 0.715 - sin * 0.715,
                        0.072 - cos * 0.072 + sin * 0.928,
                    ],
                    [
                        0.213 - cos * 0.213 + sin * 0.143,
                        0.715 + cos * 0.285 + sin * 0.140,
                        0.072 - cos * 0.072 - sin * 0.283,
                    ],
                    [
                        0.213 - cos * 0.213 - sin * 0.787,
                        0.715 - cos * 0.715 + sin * 0.715,
                        0.072 + cos * 0.928 + sin * 0.072,
                    ],
                ])
            }
            _ => Self::Linear {
                slope: 1.0,
                intercept: 0.0,
            },
        }
    }

    fn apply(&self, c: [f32; 3]) -> [f32; 3] {
        match self {
            Self::Matrix(m) => [
                m[0][0] * c[0] + m[0][1] * c[1] + m[0][2] * c[2],
                m[1][0] * c[0] + m[1][1] * c[1] + m[1][2] * c[2],
                m[2][0] * c[0] + m[2][1] * c[1] + m[2][2] * c[2],
            ],
            Self::Linear { slope, intercept } => c.map(|v| v * slope + intercept),
            Self::Invert(a) => c.map(|v| a * (1.0 - v) + (1.0 - a) * v),
        }
    }
}
