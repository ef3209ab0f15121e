//! Terminal QR rendering for QR-based linking.

use qrcode::QrCode;
use qrcode::render::unicode::Dense1x2;

/// Render `payload` as a block of half-height unicode cells.
///
/// Colors are inverted so the code scans on dark terminals.
pub fn render_qr(payload: &str) -> Option<String> {
    match QrCode::new(payload.as_bytes()) {
        Ok(code) => Some(
            code.render::<Dense1x2>()
                .dark_color(Dense1x2::Light)
                .light_color(Dense1x2::Dark)
                .quiet_zone(true)
                .build(),
        ),
        Err(e) => {
            tracing::warn!("WhatsApp: cannot render QR code: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_qr_produces_square_block() {
        let rendered = render_qr("2@abc,def,ghi,jkl").unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines.len() > 10);
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }
}
