use super::error::StoreError;

/// How many leading bytes are buffered for signature detection.
pub const SNIFF_LEN: usize = 8192;

/// Confirms uploaded bytes really are the one media type a store accepts.
///
/// Only the content is inspected. The claimed file name and any declared
/// content type are never consulted, so an executable or script renamed to
/// `report.pdf` is still rejected.
#[derive(Debug, Clone)]
pub struct ContentValidator {
    required_type: String,
    extension: String,
}

impl ContentValidator {
    pub fn new(required_type: &str, extension: &str) -> Self {
        Self {
            required_type: required_type.trim().to_ascii_lowercase(),
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn required_type(&self) -> &str {
        &self.required_type
    }

    /// Media type sniffed from the signature at the start of `data`.
    pub fn detect(data: &[u8]) -> Option<&'static str> {
        infer::get(data).map(|kind| kind.mime_type())
    }

    /// `head` is the leading portion of the upload, at least `SNIFF_LEN`
    /// bytes unless the whole upload is shorter.
    pub fn validate(&self, head: &[u8]) -> Result<(), StoreError> {
        match Self::detect(head) {
            Some(detected) if detected.eq_ignore_ascii_case(&self.required_type) => Ok(()),
            detected => Err(StoreError::InvalidContentType {
                detected: detected.map(str::to_string),
                required: self.required_type.clone(),
                extension: self.extension.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< >>\n%%EOF\n";

    fn pdf_validator() -> ContentValidator {
        ContentValidator::new("application/pdf", "pdf")
    }

    #[test]
    fn test_accepts_pdf_signature() {
        assert!(pdf_validator().validate(PDF).is_ok());
        assert_eq!(ContentValidator::detect(PDF), Some("application/pdf"));
    }

    #[test]
    fn test_rejects_plain_text() {
        let result = pdf_validator().validate(b"This is just a text file pretending to be a PDF.");
        match result {
            Err(StoreError::InvalidContentType { detected, required, .. }) => {
                assert_eq!(detected, None);
                assert_eq!(required, "application/pdf");
            }
            other => panic!("expected InvalidContentType, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_executables() {
        let mut exe = b"MZ\x90\x00\x03\x00\x00\x00".to_vec();
        exe.resize(128, 0);
        match pdf_validator().validate(&exe) {
            Err(StoreError::InvalidContentType { detected, .. }) => assert!(detected.is_some()),
            other => panic!("expected InvalidContentType, got {:?}", other),
        }

        let mut elf = b"\x7fELF\x02\x01\x01".to_vec();
        elf.resize(128, 0);
        assert!(pdf_validator().validate(&elf).is_err());
    }

    #[test]
    fn test_rejects_empty_and_truncated_content() {
        assert!(pdf_validator().validate(b"").is_err());
        assert!(pdf_validator().validate(b"%PD").is_err());
    }

    #[test]
    fn test_rejects_other_recognized_types() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];
        assert!(pdf_validator().validate(&jpeg).is_err());

        let jpeg_validator = ContentValidator::new("image/jpeg", "jpg");
        assert!(jpeg_validator.validate(&jpeg).is_ok());
        assert!(jpeg_validator.validate(PDF).is_err());
    }

    #[test]
    fn test_signature_must_lead_the_content() {
        let mut shifted = b"#!/bin/sh\n".to_vec();
        shifted.extend_from_slice(PDF);
        assert!(pdf_validator().validate(&shifted).is_err());
    }
}
