/// Straight-alpha RGBA colour with components in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Colour {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Colour {
    pub const BLACK: Colour = Colour::rgba(0.0, 0.0, 0.0, 1.0);
    pub const WHITE: Colour = Colour::rgba(1.0, 1.0, 1.0, 1.0);
    pub const TRANSPARENT: Colour = Colour::rgba(0.0, 0.0, 0.0, 0.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self { a, ..self }
    }

    pub fn with_multiplied_alpha(self, factor: f32) -> Self {
        Self { a: self.a * factor, ..self }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct RectI {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl RectI {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    pub fn is_empty(&self) -> bool {
        self.w <= 0 || self.h <= 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.w
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.h
    }

    pub fn intersection(&self, other: &RectI) -> RectI {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        RectI { x: x0, y: y0, w: (x1 - x0).max(0), h: (y1 - y0).max(0) }
    }
}

/// 2D affine transform: `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AffineTransform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub const fn identity() -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx: 0.0, ty: 0.0 }
    }

    pub const fn translation(tx: f32, ty: f32) -> Self {
        Self { a: 1.0, b: 0.0, c: 0.0, d: 1.0, tx, ty }
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self { a: sx, b: 0.0, c: 0.0, d: sy, tx: 0.0, ty: 0.0 }
    }

    pub fn rotation(radians: f32) -> Self {
        let (s, c) = radians.sin_cos();
        Self { a: c, b: s, c: -s, d: c, tx: 0.0, ty: 0.0 }
    }

    pub const fn shear(shx: f32, shy: f32) -> Self {
        Self { a: 1.0, b: shy, c: shx, d: 1.0, tx: 0.0, ty: 0.0 }
    }

    /// `self` followed by `next`.
    pub fn followed_by(&self, next: &AffineTransform) -> Self {
        Self {
            a: next.a * self.a + next.c * self.b,
            b: next.b * self.a + next.d * self.b,
            c: next.a * self.c + next.c * self.d,
            d: next.b * self.c + next.d * self.d,
            tx: next.a * self.tx + next.c * self.ty + next.tx,
            ty: next.b * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (self.a * x + self.c * y + self.tx, self.b * x + self.d * y + self.ty)
    }

    pub(crate) fn apply_f64(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.a as f64 * x + self.c as f64 * y + self.tx as f64,
            self.b as f64 * x + self.d as f64 * y + self.ty as f64,
        )
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn is_identity(&self) -> bool {
        self.is_translation() && approx_eq_f32(self.tx, 0.0) && approx_eq_f32(self.ty, 0.0)
    }

    pub fn is_translation(&self) -> bool {
        approx_eq_f32(self.a, 1.0)
            && approx_eq_f32(self.d, 1.0)
            && approx_eq_f32(self.b, 0.0)
            && approx_eq_f32(self.c, 0.0)
    }

    pub fn to_mat4(&self) -> Mat4 {
        Mat4 {
            m: [
                [self.a, self.c, 0.0, self.tx],
                [self.b, self.d, 0.0, self.ty],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }
}

/// Row-major 4x4 matrix for the fixed-function style projection/modelview pair.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4 {
    pub m: [[f32; 4]; 4],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        m: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Same matrix as `glOrtho`.
    pub fn ortho(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Self {
        let rl = right - left;
        let tb = top - bottom;
        let fnr = far - near;
        Mat4 {
            m: [
                [2.0 / rl, 0.0, 0.0, -(right + left) / rl],
                [0.0, 2.0 / tb, 0.0, -(top + bottom) / tb],
                [0.0, 0.0, -2.0 / fnr, -(far + near) / fnr],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Same matrix as `gluPerspective`; `fovy` is in degrees.
    pub fn perspective(fovy: f64, aspect: f64, near: f64, far: f64) -> Self {
        let f = 1.0 / (fovy.to_radians() * 0.5).tan();
        let nf = near - far;
        Mat4 {
            m: [
                [(f / aspect) as f32, 0.0, 0.0, 0.0],
                [0.0, f as f32, 0.0, 0.0],
                [0.0, 0.0, ((far + near) / nf) as f32, ((2.0 * far * near) / nf) as f32],
                [0.0, 0.0, -1.0, 0.0],
            ],
        }
    }

    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [[0.0f32; 4]; 4];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..4).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Mat4 { m: out }
    }

    pub fn transform(&self, p: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0f32; 4];
        for (r, cell) in out.iter_mut().enumerate() {
            *cell = (0..4).map(|k| self.m[r][k] * p[k]).sum();
        }
        out
    }
}

fn approx_eq_f32(a: f32, b: f32) -> bool {
    (a - b).abs() <= 0.0001
}
