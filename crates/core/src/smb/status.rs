use std::fmt;

/// NTSTATUS value carried in every SMB2 response header.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub u32);

impl NtStatus {
    pub const SUCCESS: Self = Self(0x0000_0000);
    pub const PENDING: Self = Self(0x0000_0103);
    pub const MORE_PROCESSING_REQUIRED: Self = Self(0xC000_0016);
    pub const INVALID_PARAMETER: Self = Self(0xC000_000D);
    pub const NO_SUCH_FILE: Self = Self(0xC000_000F);
    pub const ACCESS_DENIED: Self = Self(0xC000_0022);
    pub const OBJECT_NAME_INVALID: Self = Self(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: Self = Self(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: Self = Self(0xC000_0035);
    pub const OBJECT_PATH_NOT_FOUND: Self = Self(0xC000_003A);
    pub const SHARING_VIOLATION: Self = Self(0xC000_0043);
    pub const LOGON_FAILURE: Self = Self(0xC000_006D);
    pub const PASSWORD_EXPIRED: Self = Self(0xC000_0071);
    pub const ACCOUNT_DISABLED: Self = Self(0xC000_0072);
    pub const DISK_FULL: Self = Self(0xC000_007F);
    pub const IO_TIMEOUT: Self = Self(0xC000_00B5);
    pub const FILE_IS_A_DIRECTORY: Self = Self(0xC000_00BA);
    pub const NOT_SUPPORTED: Self = Self(0xC000_00BB);
    pub const NETWORK_NAME_DELETED: Self = Self(0xC000_00C9);
    pub const NETWORK_ACCESS_DENIED: Self = Self(0xC000_00CA);
    pub const BAD_NETWORK_NAME: Self = Self(0xC000_00CC);
    pub const NOT_A_DIRECTORY: Self = Self(0xC000_0103);
    pub const USER_SESSION_DELETED: Self = Self(0xC000_0203);

    /// Severity bits `11`.
    pub fn is_error(self) -> bool {
        self.0 >> 30 == 0b11
    }

    /// Both spellings the server uses for "nothing there".
    pub fn is_not_found(self) -> bool {
        self == Self::OBJECT_NAME_NOT_FOUND
            || self == Self::OBJECT_PATH_NOT_FOUND
            || self == Self::NO_SUCH_FILE
    }

    pub fn name(self) -> Option<&'static str> {
        let name = match self {
            Self::SUCCESS => "STATUS_SUCCESS",
            Self::PENDING => "STATUS_PENDING",
            Self::MORE_PROCESSING_REQUIRED => "STATUS_MORE_PROCESSING_REQUIRED",
            Self::INVALID_PARAMETER => "STATUS_INVALID_PARAMETER",
            Self::NO_SUCH_FILE => "STATUS_NO_SUCH_FILE",
            Self::ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            Self::OBJECT_NAME_INVALID => "STATUS_OBJECT_NAME_INVALID",
            Self::OBJECT_NAME_NOT_FOUND => "STATUS_OBJECT_NAME_NOT_FOUND",
            Self::OBJECT_NAME_COLLISION => "STATUS_OBJECT_NAME_COLLISION",
            Self::OBJECT_PATH_NOT_FOUND => "STATUS_OBJECT_PATH_NOT_FOUND",
            Self::SHARING_VIOLATION => "STATUS_SHARING_VIOLATION",
            Self::LOGON_FAILURE => "STATUS_LOGON_FAILURE",
            Self::PASSWORD_EXPIRED => "STATUS_PASSWORD_EXPIRED",
            Self::ACCOUNT_DISABLED => "STATUS_ACCOUNT_DISABLED",
            Self::DISK_FULL => "STATUS_DISK_FULL",
            Self::IO_TIMEOUT => "STATUS_IO_TIMEOUT",
            Self::FILE_IS_A_DIRECTORY => "STATUS_FILE_IS_A_DIRECTORY",
            Self::NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            Self::NETWORK_NAME_DELETED => "STATUS_NETWORK_NAME_DELETED",
            Self::NETWORK_ACCESS_DENIED => "STATUS_NETWORK_ACCESS_DENIED",
            Self::BAD_NETWORK_NAME => "STATUS_BAD_NETWORK_NAME",
            Self::NOT_A_DIRECTORY => "STATUS_NOT_A_DIRECTORY",
            Self::USER_SESSION_DELETED => "STATUS_USER_SESSION_DELETED",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} (0x{:08x})", self.0),
            None => write!(f, "NTSTATUS 0x{:08x}", self.0),
        }
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_and_display() {
        assert!(NtStatus::LOGON_FAILURE.is_error());
        assert!(!NtStatus::PENDING.is_error());
        assert!(!NtStatus::SUCCESS.is_error());
        assert!(NtStatus::OBJECT_PATH_NOT_FOUND.is_not_found());
        assert!(!NtStatus::ACCESS_DENIED.is_not_found());
        assert_eq!(
            NtStatus::OBJECT_NAME_COLLISION.to_string(),
            "STATUS_OBJECT_NAME_COLLISION (0xc0000035)"
        );
        assert_eq!(NtStatus(0xC000_1234).to_string(), "NTSTATUS 0xc0001234");
    }
}
