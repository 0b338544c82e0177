//! Failure taxonomy shared with the pool controller.
//!
//! Two closed enumerations live here: [`ErrorKind`], the client-side failure
//! classification, and [`ServerCode`], the raw wire codes received from the
//! controller. Every variant carries a stable integer id that is part of the
//! client/server protocol; ids must never be reassigned.
//!
//! Classification is total: unmapped wire codes resolve to
//! [`ServerCode::Unknown`] and [`ErrorKind::Unknown`] rather than erroring,
//! and [`human_message`] always produces something displayable.

use std::fmt;

/// Client-side failure classification.
///
/// Wire ids are synchronized with the server side and must be kept stable.
/// The retry disposition of each kind is encoded in its human message: kinds
/// whose message says the client "will try again" are auto-retry eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ok,
    Unknown,
    WrongConfiguration,
    AuthenticationFailed,
    TooOldClient,
    SessionDisabled,
    RendererNotAvailable,
    MissingRenderer,
    MissingScene,
    NoOutputFile,
    ImageTooLarge,
    DownloadFile,
    CanNotCreateDirectory,
    NetworkIssue,
    RendererCrashed,
    RendererCrashedPythonError,
    RendererOutOfVideoMemory,
    RendererOutOfMemory,
    RendererKilled,
    RendererKilledByUser,
    RendererKilledByUserOverTime,
    RendererKilledByServer,
    RendererMissingLibraries,
    FailedToExecute,
    OsNotSupported,
    CpuNotSupported,
    GpuNotSupported,
    EngineNotAvailable,
    ValidationFailed,
    ImageWrongDimension,
    // internal error handling
    NoSpaceLeftOnDevice,
    BadResponse,
}

impl ErrorKind {
    /// Every kind, for table-driven tests and reporting.
    pub const ALL: [ErrorKind; 32] = [
        ErrorKind::Ok,
        ErrorKind::Unknown,
        ErrorKind::WrongConfiguration,
        ErrorKind::AuthenticationFailed,
        ErrorKind::TooOldClient,
        ErrorKind::SessionDisabled,
        ErrorKind::RendererNotAvailable,
        ErrorKind::MissingRenderer,
        ErrorKind::MissingScene,
        ErrorKind::NoOutputFile,
        ErrorKind::ImageTooLarge,
        ErrorKind::DownloadFile,
        ErrorKind::CanNotCreateDirectory,
        ErrorKind::NetworkIssue,
        ErrorKind::RendererCrashed,
        ErrorKind::RendererCrashedPythonError,
        ErrorKind::RendererOutOfVideoMemory,
        ErrorKind::RendererOutOfMemory,
        ErrorKind::RendererKilled,
        ErrorKind::RendererKilledByUser,
        ErrorKind::RendererKilledByUserOverTime,
        ErrorKind::RendererKilledByServer,
        ErrorKind::RendererMissingLibraries,
        ErrorKind::FailedToExecute,
        ErrorKind::OsNotSupported,
        ErrorKind::CpuNotSupported,
        ErrorKind::GpuNotSupported,
        ErrorKind::EngineNotAvailable,
        ErrorKind::ValidationFailed,
        ErrorKind::ImageWrongDimension,
        ErrorKind::NoSpaceLeftOnDevice,
        ErrorKind::BadResponse,
    ];

    /// Stable wire id for this kind.
    ///
    /// `ImageTooLarge` and `ImageWrongDimension` share id 26 on the server
    /// side; that collision is part of the historical contract and is kept.
    pub fn wire_id(self) -> i32 {
        match self {
            ErrorKind::Ok => 0,
            ErrorKind::WrongConfiguration => 1,
            ErrorKind::AuthenticationFailed => 2,
            ErrorKind::TooOldClient => 3,
            ErrorKind::SessionDisabled => 4,
            ErrorKind::RendererNotAvailable => 5,
            ErrorKind::MissingRenderer => 6,
            ErrorKind::MissingScene => 7,
            ErrorKind::NoOutputFile => 8,
            ErrorKind::DownloadFile => 9,
            ErrorKind::CanNotCreateDirectory => 10,
            ErrorKind::NetworkIssue => 11,
            ErrorKind::RendererCrashed => 12,
            ErrorKind::RendererOutOfVideoMemory => 13,
            ErrorKind::RendererKilled => 14,
            ErrorKind::RendererMissingLibraries => 15,
            ErrorKind::FailedToExecute => 16,
            ErrorKind::OsNotSupported => 17,
            ErrorKind::CpuNotSupported => 18,
            ErrorKind::GpuNotSupported => 19,
            ErrorKind::RendererKilledByUser => 20,
            ErrorKind::RendererOutOfMemory => 21,
            ErrorKind::RendererKilledByServer => 22,
            ErrorKind::RendererKilledByUserOverTime => 23,
            ErrorKind::RendererCrashedPythonError => 24,
            ErrorKind::ValidationFailed => 25,
            ErrorKind::ImageTooLarge => 26,
            ErrorKind::ImageWrongDimension => 26,
            ErrorKind::EngineNotAvailable => 27,
            ErrorKind::Unknown => 99,
            ErrorKind::NoSpaceLeftOnDevice => 100,
            ErrorKind::BadResponse => 101,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Wire codes received from the pool controller.
///
/// Ids are owned by the server; [`ServerCode::from_id`] maps anything it does
/// not recognize to [`ServerCode::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerCode {
    Ok,
    Unknown,

    ConfigurationNoClientVersionGiven,
    ConfigurationClientTooOld,
    ConfigurationAuthFailed,
    ConfigurationWebSessionExpired,
    ConfigurationMissingParameter,

    JobRequestNoJob,
    JobRequestNoRenderingRight,
    JobRequestDeadSession,
    JobRequestSessionDisabled,
    JobRequestInternalError,
    JobRequestRendererNotAvailable,
    JobRequestServerInMaintenance,
    JobRequestServerOverloaded,

    JobValidationMissingParameter,
    JobValidationBrokenMachine,
    JobValidationFrameIsNotImage,
    JobValidationUploadFailed,
    JobValidationSessionDisabled,
    JobValidationImageTooLarge,
    JobValidationImageWrongDimension,

    KeepAliveStopRendering,

    // internal error handling
    NoRoot,
    BadResponse,
    RequestFailed,
}

impl ServerCode {
    /// Every code, for table-driven tests and reporting.
    pub const ALL: [ServerCode; 26] = [
        ServerCode::Ok,
        ServerCode::Unknown,
        ServerCode::ConfigurationNoClientVersionGiven,
        ServerCode::ConfigurationClientTooOld,
        ServerCode::ConfigurationAuthFailed,
        ServerCode::ConfigurationWebSessionExpired,
        ServerCode::ConfigurationMissingParameter,
        ServerCode::JobRequestNoJob,
        ServerCode::JobRequestNoRenderingRight,
        ServerCode::JobRequestDeadSession,
        ServerCode::JobRequestSessionDisabled,
        ServerCode::JobRequestInternalError,
        ServerCode::JobRequestRendererNotAvailable,
        ServerCode::JobRequestServerInMaintenance,
        ServerCode::JobRequestServerOverloaded,
        ServerCode::JobValidationMissingParameter,
        ServerCode::JobValidationBrokenMachine,
        ServerCode::JobValidationFrameIsNotImage,
        ServerCode::JobValidationUploadFailed,
        ServerCode::JobValidationSessionDisabled,
        ServerCode::JobValidationImageTooLarge,
        ServerCode::JobValidationImageWrongDimension,
        ServerCode::KeepAliveStopRendering,
        ServerCode::NoRoot,
        ServerCode::BadResponse,
        ServerCode::RequestFailed,
    ];

    /// Stable wire id for this code.
    pub fn wire_id(self) -> i32 {
        match self {
            ServerCode::Ok => 0,
            ServerCode::NoRoot => 2,
            ServerCode::BadResponse => 3,
            ServerCode::RequestFailed => 5,
            ServerCode::ConfigurationNoClientVersionGiven => 100,
            ServerCode::ConfigurationClientTooOld => 101,
            ServerCode::ConfigurationAuthFailed => 102,
            ServerCode::ConfigurationWebSessionExpired => 103,
            ServerCode::ConfigurationMissingParameter => 104,
            ServerCode::JobRequestNoJob => 200,
            ServerCode::JobRequestNoRenderingRight => 201,
            ServerCode::JobRequestDeadSession => 202,
            ServerCode::JobRequestSessionDisabled => 203,
            ServerCode::JobRequestInternalError => 204,
            ServerCode::JobRequestRendererNotAvailable => 205,
            ServerCode::JobRequestServerInMaintenance => 206,
            ServerCode::JobRequestServerOverloaded => 207,
            ServerCode::JobValidationMissingParameter => 300,
            ServerCode::JobValidationBrokenMachine => 301,
            ServerCode::JobValidationFrameIsNotImage => 302,
            ServerCode::JobValidationUploadFailed => 303,
            ServerCode::JobValidationSessionDisabled => 304,
            ServerCode::JobValidationImageTooLarge => 306,
            ServerCode::JobValidationImageWrongDimension => 308,
            ServerCode::KeepAliveStopRendering => 400,
            ServerCode::Unknown => 999,
        }
    }

    /// Resolve a raw wire id to a code.
    ///
    /// Total over all of `i32`; ids the client does not know about resolve to
    /// [`ServerCode::Unknown`].
    pub fn from_id(id: i32) -> ServerCode {
        ServerCode::ALL
            .into_iter()
            .find(|code| code.wire_id() == id)
            .unwrap_or(ServerCode::Unknown)
    }
}

impl fmt::Display for ServerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.wire_id())
    }
}

/// Classify a server wire code as a client-side failure kind.
///
/// Total and deterministic; codes without a dedicated kind collapse to
/// [`ErrorKind::Unknown`]. Many-to-one mappings are intentional.
pub fn server_code_to_kind(code: ServerCode) -> ErrorKind {
    match code {
        ServerCode::Ok => ErrorKind::Ok,
        ServerCode::Unknown => ErrorKind::Unknown,
        ServerCode::ConfigurationClientTooOld => ErrorKind::TooOldClient,
        ServerCode::ConfigurationAuthFailed => ErrorKind::AuthenticationFailed,

        ServerCode::ConfigurationNoClientVersionGiven | ServerCode::ConfigurationWebSessionExpired => {
            ErrorKind::WrongConfiguration
        }

        ServerCode::JobRequestSessionDisabled | ServerCode::JobValidationSessionDisabled => {
            ErrorKind::SessionDisabled
        }

        ServerCode::JobRequestRendererNotAvailable => ErrorKind::RendererNotAvailable,

        _ => ErrorKind::Unknown,
    }
}

/// User-facing explanation for a failure kind.
///
/// One deterministic paragraph per kind; the phrase "will try again" marks
/// kinds the client retries on its own. Kinds without a bespoke message fall
/// back to their symbolic name.
pub fn human_message(kind: ErrorKind) -> String {
    let message = match kind {
        ErrorKind::BadResponse => {
            "Corrupt response from the server when trying to upload data. The server might be \
             overloaded or encountering other issues. Will try again in a few minutes."
        }
        ErrorKind::NetworkIssue => {
            "Could not connect to the server, please check your connection to the internet."
        }
        ErrorKind::TooOldClient => "This client is too old, you need to update it.",
        ErrorKind::AuthenticationFailed => {
            "Failed to authenticate, please check your login and password."
        }
        ErrorKind::DownloadFile => {
            "Error while downloading project files. Will try another project in a few minutes."
        }
        ErrorKind::NoOutputFile => {
            "The rendering engine shut down without saving an image. This could be a broken \
             project, or you could be missing libraries the engine needs. Will try another \
             project in a few minutes."
        }
        ErrorKind::ImageTooLarge => {
            "The generated image is too big to be handled by the server. Will try another \
             project in a few minutes."
        }
        ErrorKind::RendererCrashed => {
            "The rendering engine has crashed. This is usually because the project consumes too \
             much memory, or is just broken. Will try another project in a few minutes."
        }
        ErrorKind::RendererCrashedPythonError => {
            "The rendering engine has crashed due to a Python error. Will try another project \
             in a few minutes."
        }
        ErrorKind::RendererOutOfVideoMemory => {
            "Project tried to use too much video memory (VRAM). Will try another project in a \
             few minutes."
        }
        ErrorKind::RendererOutOfMemory => {
            "Project tried to use too much memory. Will try another project in a few minutes."
        }
        ErrorKind::GpuNotSupported => {
            "Project requires a newer GPU, or your compute driver setup is broken. Will try \
             another project in a few minutes."
        }
        ErrorKind::RendererMissingLibraries => {
            "Failed to launch the rendering engine. Please check if you have all the necessary \
             libraries installed and if you have enough free space in your working directory."
        }
        ErrorKind::RendererKilled => {
            "Render canceled because either you stopped it from the website or the server did \
             automatically (usually for a render taking too long)."
        }
        ErrorKind::RendererKilledByUser => "Render canceled because you've blocked the project.",
        ErrorKind::RendererKilledByServer => {
            "Render canceled because the project has been stopped by the server. Usually \
             because the project will take too much time or it's been paused."
        }
        ErrorKind::SessionDisabled => {
            "The server has disabled your session. Your node may have generated a broken frame \
             (GPU not compatible, not enough RAM/VRAM, etc)."
        }
        ErrorKind::RendererNotAvailable => {
            "The official engine builds don't support rendering on this hardware."
        }
        ErrorKind::MissingRenderer => {
            "Unable to locate the rendering engine within the binary download."
        }
        ErrorKind::OsNotSupported => "Operating System not supported.",
        ErrorKind::CpuNotSupported => "CPU not supported.",
        ErrorKind::EngineNotAvailable => {
            "Project requires a rendering engine that isn't supported on this machine. Will \
             try another project in a few minutes."
        }
        ErrorKind::NoSpaceLeftOnDevice => "No space left on hard disk.",
        ErrorKind::ImageWrongDimension => {
            "Rendered image was the wrong resolution. Project is configured incorrectly. \
             Switching to another project."
        }
        _ => return kind.to_string(),
    };
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_id_round_trips_every_code() {
        for code in ServerCode::ALL {
            assert_eq!(ServerCode::from_id(code.wire_id()), code, "{:?}", code);
        }
    }

    #[test]
    fn from_id_maps_unknown_ids_to_unknown() {
        for id in [-1, 1, 42, 305, 500, 1000, i32::MAX, i32::MIN] {
            assert_eq!(ServerCode::from_id(id), ServerCode::Unknown);
        }
    }

    #[test]
    fn classification_is_total() {
        // Classification must never panic and never invent kinds outside the
        // taxonomy, whatever the server sends.
        for code in ServerCode::ALL {
            let kind = server_code_to_kind(code);
            assert!(ErrorKind::ALL.contains(&kind), "{:?} -> {:?}", code, kind);
        }
    }

    #[test]
    fn classification_table() {
        let expected = [
            (ServerCode::Ok, ErrorKind::Ok),
            (ServerCode::ConfigurationClientTooOld, ErrorKind::TooOldClient),
            (ServerCode::ConfigurationAuthFailed, ErrorKind::AuthenticationFailed),
            (ServerCode::ConfigurationNoClientVersionGiven, ErrorKind::WrongConfiguration),
            (ServerCode::ConfigurationWebSessionExpired, ErrorKind::WrongConfiguration),
            (ServerCode::JobRequestSessionDisabled, ErrorKind::SessionDisabled),
            (ServerCode::JobValidationSessionDisabled, ErrorKind::SessionDisabled),
            (ServerCode::JobRequestRendererNotAvailable, ErrorKind::RendererNotAvailable),
            // No dedicated kind: falls through to Unknown.
            (ServerCode::JobRequestServerOverloaded, ErrorKind::Unknown),
            (ServerCode::KeepAliveStopRendering, ErrorKind::Unknown),
        ];
        for (code, kind) in expected {
            assert_eq!(server_code_to_kind(code), kind, "{:?}", code);
        }
    }

    #[test]
    fn human_message_defined_for_every_kind() {
        for kind in ErrorKind::ALL {
            assert!(!human_message(kind).is_empty(), "{:?}", kind);
        }
    }

    #[test]
    fn human_message_falls_back_to_symbolic_name() {
        assert_eq!(human_message(ErrorKind::MissingScene), "MissingScene");
        assert_eq!(human_message(ErrorKind::ValidationFailed), "ValidationFailed");
    }

    #[test]
    fn retryable_kinds_say_so_in_the_message() {
        for kind in [
            ErrorKind::RendererCrashed,
            ErrorKind::RendererOutOfMemory,
            ErrorKind::DownloadFile,
            ErrorKind::BadResponse,
        ] {
            assert!(
                human_message(kind).to_lowercase().contains("will try"),
                "{:?}",
                kind
            );
        }
    }

    #[test]
    fn wire_ids_are_stable() {
        // Spot checks against the server contract. Changing any of these
        // breaks compatibility with deployed controllers.
        assert_eq!(ErrorKind::Ok.wire_id(), 0);
        assert_eq!(ErrorKind::WrongConfiguration.wire_id(), 1);
        assert_eq!(ErrorKind::RendererCrashed.wire_id(), 12);
        assert_eq!(ErrorKind::RendererOutOfMemory.wire_id(), 21);
        assert_eq!(ErrorKind::Unknown.wire_id(), 99);
        assert_eq!(ErrorKind::NoSpaceLeftOnDevice.wire_id(), 100);
        // Historical server-side collision, preserved on purpose.
        assert_eq!(ErrorKind::ImageTooLarge.wire_id(), 26);
        assert_eq!(ErrorKind::ImageWrongDimension.wire_id(), 26);

        assert_eq!(ServerCode::ConfigurationAuthFailed.wire_id(), 102);
        assert_eq!(ServerCode::JobRequestNoJob.wire_id(), 200);
        assert_eq!(ServerCode::JobValidationImageWrongDimension.wire_id(), 308);
        assert_eq!(ServerCode::Unknown.wire_id(), 999);
    }
}
