use quick_error::quick_error;
use std::io::Error as IOError;

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum MsmError {
        /// The external registration tool could not be located.
        ToolNotFound(msg: String) {
            display("MSM tool not found: {}", msg)
        }

        /// A data array carries a coordinate system that differs from the mesh it is associated with.
        CoordSystemMismatch(msg: String) {
            display("Provided data is in different coordsys than the mesh: {}", msg)
        }

        /// An external executable returned a non-zero exit code.
        ToolFailed(command: String, code: i32) {
            display("Failed to run command (exit code {}):\n{}", code, command)
        }

        NotFitted {
            display("Model is not fitted, call fit or load_model first")
        }

        ShapeMismatch(msg: String) {
            display("Shape mismatch: {}", msg)
        }

        InvalidGiftiFormat(msg: String) {
            display("Invalid GIFTI file: {}", msg)
        }

        InvalidDpvFormat(msg: String) {
            display("Invalid data-per-vertex file: {}", msg)
        }

        InvalidConfig(msg: String) {
            display("Invalid MSM configuration: {}", msg)
        }

        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
        }

        Xml(err: quick_xml::Error) {
            from()
            source(err)
        }

        Base64(err: base64::DecodeError) {
            from()
            source(err)
        }

        Csv(err: csv::Error) {
            from()
            source(err)
        }

        Json(err: serde_json::Error) {
            from()
            source(err)
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, MsmError>;
