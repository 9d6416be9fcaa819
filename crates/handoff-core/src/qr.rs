use qrcode::render::svg;
use qrcode::{EcLevel, QrCode};

use crate::{CoreError, TokenDescriptor};

/// Edge of the rendered code in pixels, quiet zone included.
pub const QR_SIZE: u32 = 160;

impl TokenDescriptor {
    /// Module matrix for the continuation link. Low error correction keeps
    /// the code sparse enough to scan off a laptop screen.
    pub fn qr_code(&self) -> Result<QrCode, CoreError> {
        QrCode::with_error_correction_level(self.continuation_url.as_str(), EcLevel::L)
            .map_err(|err| CoreError::QrEncoding(err.to_string()))
    }

    pub fn qr_svg(&self) -> Result<String, CoreError> {
        let code = self.qr_code()?;
        Ok(code
            .render::<svg::Color<'_>>()
            .min_dimensions(QR_SIZE, QR_SIZE)
            .quiet_zone(true)
            .build())
    }
}
