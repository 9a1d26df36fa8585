//! Prescription PDF rendering
//!
//! A4 pages with the built-in Helvetica fonts. The verification QR code sits
//! in the top-right corner of the first page.

pub mod qr;

use crate::models::{Medication, Patient, Prescription};
use anyhow::{anyhow, Result};
use chrono::Utc;
use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Rgb,
};
use std::io::BufWriter;
use tracing::debug;

use qr::QrMatrix;

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const LEFT: f32 = 20.0;
const INDENT: f32 = 26.0;
const TOP: f32 = 277.0;
const BOTTOM_MARGIN: f32 = 22.0;
const QR_SIZE: f32 = 35.0;
const WRAP: usize = 75;

pub struct RenderedPdf {
    pub bytes: Vec<u8>,
    pub pages: usize,
}

impl RenderedPdf {
    pub fn filename(prescription: &Prescription) -> String {
        format!("prescription-{}.pdf", prescription.id)
    }
}

/// Tracks the write position and starts new pages when one fills up
struct PageWriter<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    y: f32,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    pages: usize,
}

impl<'a> PageWriter<'a> {
    fn ensure_space(&mut self, needed: f32) {
        if self.y - needed >= BOTTOM_MARGIN {
            return;
        }
        self.pages += 1;
        let (page, layer) = self.doc.add_page(
            Mm(PAGE_WIDTH),
            Mm(PAGE_HEIGHT),
            format!("Page {}", self.pages),
        );
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.y = TOP;
    }

    fn text(&mut self, text: &str, size: f32, x: f32, bold: bool) {
        let line_height = size * 0.45 + 1.0;
        self.ensure_space(line_height);
        let font = if bold { &self.bold } else { &self.regular };
        self.layer.use_text(text, size, Mm(x), Mm(self.y), font);
        self.y -= line_height;
    }

    fn paragraph(&mut self, text: &str, size: f32, x: f32) {
        self.lines(&wrap_text(text, WRAP), size, x, false);
    }

    fn lines(&mut self, lines: &[String], size: f32, x: f32, bold: bool) {
        for line in lines {
            self.text(line, size, x, bold);
        }
    }

    fn heading(&mut self, text: &str) {
        self.gap(3.0);
        self.ensure_space(12.0);
        self.text(text, 11.0, LEFT, true);
        self.gap(1.0);
    }

    fn gap(&mut self, mm: f32) {
        self.y -= mm;
    }

    fn colored<F: FnOnce(&mut Self)>(&mut self, rgb: (f32, f32, f32), f: F) {
        self.layer
            .set_fill_color(Color::Rgb(Rgb::new(rgb.0, rgb.1, rgb.2, None)));
        f(self);
        self.layer
            .set_fill_color(Color::Rgb(Rgb::new(0.0, 0.0, 0.0, None)));
    }
}

/// Render `prescription` to PDF bytes. `patient` adds date of birth, gender
/// and allergies when available.
pub fn render_prescription(
    prescription: &Prescription,
    patient: Option<&Patient>,
    verification_url: &str,
) -> Result<RenderedPdf> {
    let title = format!("Prescription {}", prescription.id);
    let (doc, page1, layer1) =
        PdfDocument::new(&title, Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Page 1");
    let regular = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .map_err(|e| anyhow!("PDF font error: {}", e))?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .map_err(|e| anyhow!("PDF font error: {}", e))?;

    let first_layer = doc.get_page(page1).get_layer(layer1);
    let matrix = QrMatrix::encode(verification_url)?;
    qr::draw(
        &first_layer,
        &matrix,
        Mm(PAGE_WIDTH - LEFT - QR_SIZE + 5.0),
        Mm(PAGE_HEIGHT - 10.0),
        Mm(QR_SIZE),
    );

    let mut w = PageWriter {
        doc: &doc,
        layer: first_layer,
        y: TOP,
        regular,
        bold,
        pages: 1,
    };

    // Header
    w.text("PRESCRIPTION", 18.0, LEFT, true);
    w.gap(2.0);
    w.text(
        &format!("Issued: {}", prescription.issued_at.format("%Y-%m-%d %H:%M UTC")),
        9.0,
        LEFT,
        false,
    );
    w.text(&format!("ID: {}", prescription.id), 9.0, LEFT, false);
    if let Some(valid_until) = prescription.valid_until {
        w.text(
            &format!("Valid until: {}", valid_until.format("%Y-%m-%d")),
            9.0,
            LEFT,
            false,
        );
    }
    if !prescription.is_active() {
        w.gap(2.0);
        w.colored((0.8, 0.0, 0.0), |w| {
            w.text("CANCELLED - NOT VALID FOR DISPENSING", 12.0, LEFT, true);
        });
    }

    // Leave room under the QR code before the body starts
    w.y = w.y.min(PAGE_HEIGHT - 10.0 - QR_SIZE - 6.0);

    w.heading("Prescriber");
    w.text(&prescription.doctor_name, 10.0, INDENT, false);

    w.heading("Patient");
    w.text(&prescription.patient_name, 10.0, INDENT, false);
    if let Some(patient) = patient {
        let today = Utc::now().date_naive();
        w.text(
            &format!(
                "Born {} (age {}), {}",
                patient.date_of_birth.format("%Y-%m-%d"),
                patient.age_on(today),
                patient.gender.as_str()
            ),
            10.0,
            INDENT,
            false,
        );
        if !patient.allergies.is_empty() {
            w.paragraph(
                &format!("Allergies: {}", patient.allergies.join(", ")),
                10.0,
                INDENT,
            );
        }
    }

    w.heading("Diagnosis");
    w.paragraph(&prescription.diagnosis, 10.0, INDENT);

    w.heading("Rx");
    for (i, med) in prescription.medications.iter().enumerate() {
        w.ensure_space(14.0);
        w.lines(&medication_heading(i + 1, med), 10.0, INDENT, true);
        let mut schedule = med.frequency.clone();
        if let Some(duration) = med.duration.as_deref().filter(|d| !d.trim().is_empty()) {
            schedule.push_str(&format!(", for {}", duration));
        }
        w.paragraph(&schedule, 10.0, INDENT + 5.0);
        if let Some(instructions) = med.instructions.as_deref().filter(|s| !s.trim().is_empty()) {
            w.paragraph(instructions, 9.0, INDENT + 5.0);
        }
        w.gap(1.5);
    }

    if let Some(notes) = prescription.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        w.heading("Notes");
        w.paragraph(notes, 10.0, INDENT);
    }

    // Footer
    w.gap(6.0);
    w.text(
        "Scan the QR code or open the link below to verify this prescription:",
        8.0,
        LEFT,
        false,
    );
    w.paragraph(verification_url, 8.0, LEFT);

    let pages = w.pages;
    drop(w);

    let mut buf = BufWriter::new(Vec::new());
    doc.save(&mut buf)
        .map_err(|e| anyhow!("PDF save error: {}", e))?;
    let bytes = buf
        .into_inner()
        .map_err(|e| anyhow!("PDF buffer error: {}", e))?;

    debug!(
        "Rendered prescription {} ({} pages, {} bytes)",
        prescription.id,
        pages,
        bytes.len()
    );
    Ok(RenderedPdf { bytes, pages })
}

/// "1. Name Dosage", wrapped like body text
fn medication_heading(number: usize, med: &Medication) -> Vec<String> {
    wrap_text(&format!("{}. {} {}", number, med.name, med.dosage), WRAP)
}

/// Greedy word wrap; words longer than a line are split
fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            lines.push(head);
        }
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
