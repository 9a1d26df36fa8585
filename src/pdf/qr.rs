//! QR code for prescription verification links

use anyhow::{anyhow, Result};
use printpdf::{Mm, PdfLayerReference, Rect};
use qrcode::{Color, EcLevel, QrCode};

/// Module matrix of an encoded QR code, row-major, `true` = dark
#[derive(Debug, Clone)]
pub struct QrMatrix {
    pub width: usize,
    pub dark: Vec<bool>,
}

impl QrMatrix {
    pub fn encode(data: &str) -> Result<Self> {
        let code = QrCode::with_error_correction_level(data.as_bytes(), EcLevel::M)
            .map_err(|e| anyhow!("Failed to encode QR code: {}", e))?;
        let width = code.width();
        let dark = code
            .to_colors()
            .into_iter()
            .map(|c| c == Color::Dark)
            .collect();
        Ok(Self { width, dark })
    }

    pub fn is_dark(&self, x: usize, y: usize) -> bool {
        self.dark[y * self.width + x]
    }

    #[cfg(test)]
    fn dark_count(&self) -> usize {
        self.dark.iter().filter(|d| **d).count()
    }
}

/// Paint `matrix` with its top-left corner at (`left`, `top`), `size` wide
pub fn draw(layer: &PdfLayerReference, matrix: &QrMatrix, left: Mm, top: Mm, size: Mm) {
    let module = size.0 / matrix.width as f32;
    for y in 0..matrix.width {
        for x in 0..matrix.width {
            if !matrix.is_dark(x, y) {
                continue;
            }
            let llx = left.0 + x as f32 * module;
            let ury = top.0 - y as f32 * module;
            layer.add_rect(Rect::new(
                Mm(llx),
                Mm(ury - module),
                Mm(llx + module),
                Mm(ury),
            ));
        }
    }
}
