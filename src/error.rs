error_chain! {
    foreign_links {
        Io(::std::io::Error);
    }

    errors {
        Integrity(reason: String) {
            description("data integrity error")
                display("data integrity error: {}", reason)
        }

        ControlFile(reason: String) {
            description("unusable control file")
                display("unusable control file: {}", reason)
        }

        Unsupported(op: &'static str) {
            description("operation unsupported by this storage")
                display("operation unsupported by this storage: {}", op)
        }

        LengthMismatch(expected: u64, actual: u64) {
            description("length mismatch")
                display("length mismatch, expected: {}, actual: {}", expected, actual)
        }
    }
}
