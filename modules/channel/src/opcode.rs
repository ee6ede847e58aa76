//! Operation codes, grouped by protocol layer
//!
//! Root and Intermediate codes overlap numerically (`0x20`-`0x22`), so a code
//! is only meaningful together with its layer. `OpCode` always carries both.

use serde::{Deserialize, Serialize};
use sluice_core::SluiceError;
use sluice_state::ChannelStatus;
use std::fmt;

/// Protocol layer an operation code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpLayer {
    Root,
    Intermediate,
    Wallet,
    Channel,
    Storage,
}

impl OpLayer {
    pub const ALL: [OpLayer; 5] = [
        OpLayer::Root,
        OpLayer::Intermediate,
        OpLayer::Wallet,
        OpLayer::Channel,
        OpLayer::Storage,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OpLayer::Root => "root",
            OpLayer::Intermediate => "intermediate",
            OpLayer::Wallet => "wallet",
            OpLayer::Channel => "channel",
            OpLayer::Storage => "storage",
        }
    }
}

impl fmt::Display for OpLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! layer_ops {
    ($(#[$meta:meta])* $name:ident, $layer:expr, { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn value(self) -> u8 {
                self as u8
            }
        }

        impl TryFrom<u32> for $name {
            type Error = SluiceError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $value => Ok($name::$variant),)+
                    _ => Err(SluiceError::InvalidOpCode {
                        layer: $layer.name().to_string(),
                        value,
                    }),
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = SluiceError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                Self::try_from(value as u32)
            }
        }
    };
}

layer_ops!(
    /// Root contract operations
    RootOp, OpLayer::Root, {
        Deploy = 0x01,
        CreateChildContract = 0x02,
        UpdateCode = 0x03,
        SetOwner = 0x04,
        Withdraw = 0x10,
        TopUp = 0x11,
        SendMessage = 0x20,
        Bounce = 0x21,
        Upgrade = 0x22,
    }
);

layer_ops!(
    /// Intermediate (router) contract operations
    IntermediateOp, OpLayer::Intermediate, {
        ForwardMessage = 0x20,
        DeployWallet = 0x21,
        RegisterChannel = 0x22,
        UpdateRoute = 0x30,
        CollectFees = 0x40,
        Shutdown = 0x61,
    }
);

layer_ops!(
    /// Wallet contract operations
    WalletOp, OpLayer::Wallet, {
        InitWallet = 0x70,
        Transfer = 0x71,
        Deposit = 0x72,
        Withdraw = 0x73,
        OpenChannel = 0x80,
        LockFunds = 0x81,
        UnlockFunds = 0x82,
        Sync = 0xD1,
    }
);

layer_ops!(
    /// Channel operations; the only codes a channel transaction carries
    ChannelOp, OpLayer::Channel, {
        InitChannel = 0xA0,
        CreatePayment = 0xA1,
        SendMessage = 0xA2,
        Dispute = 0xE0,
        CloseChannel = 0xF0,
        FinalizeClose = 0xF2,
    }
);

layer_ops!(
    /// Storage contract operations
    StorageOp, OpLayer::Storage, {
        Put = 0xC0,
        Get = 0xC1,
        Delete = 0xC2,
        Snapshot = 0xD0,
        Prune = 0xE1,
    }
);

impl ChannelOp {
    /// Ops that must carry a balance proof against the current root
    pub fn requires_proof(self) -> bool {
        matches!(
            self,
            ChannelOp::CreatePayment | ChannelOp::CloseChannel | ChannelOp::FinalizeClose
        )
    }

    /// Whether `amount` moves between participants
    pub fn moves_funds(self) -> bool {
        matches!(
            self,
            ChannelOp::CreatePayment
                | ChannelOp::SendMessage
                | ChannelOp::CloseChannel
                | ChannelOp::FinalizeClose
        )
    }

    pub fn required_status(self) -> ChannelStatus {
        match self {
            ChannelOp::InitChannel => ChannelStatus::Pending,
            _ => ChannelStatus::Active,
        }
    }
}

impl Default for ChannelOp {
    fn default() -> Self {
        ChannelOp::SendMessage
    }
}

impl fmt::Display for ChannelOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.value())
    }
}

/// A layer-qualified operation code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpCode {
    Root(RootOp),
    Intermediate(IntermediateOp),
    Wallet(WalletOp),
    Channel(ChannelOp),
    Storage(StorageOp),
}

impl OpCode {
    /// Narrow an untyped value to a code of `layer`
    ///
    /// Total over `u32`: undeclared values yield `InvalidOpCode`.
    pub fn try_from_layer(layer: OpLayer, value: u32) -> Result<OpCode, SluiceError> {
        Ok(match layer {
            OpLayer::Root => OpCode::Root(RootOp::try_from(value)?),
            OpLayer::Intermediate => OpCode::Intermediate(IntermediateOp::try_from(value)?),
            OpLayer::Wallet => OpCode::Wallet(WalletOp::try_from(value)?),
            OpLayer::Channel => OpCode::Channel(ChannelOp::try_from(value)?),
            OpLayer::Storage => OpCode::Storage(StorageOp::try_from(value)?),
        })
    }

    pub fn layer(&self) -> OpLayer {
        match self {
            OpCode::Root(_) => OpLayer::Root,
            OpCode::Intermediate(_) => OpLayer::Intermediate,
            OpCode::Wallet(_) => OpLayer::Wallet,
            OpCode::Channel(_) => OpLayer::Channel,
            OpCode::Storage(_) => OpLayer::Storage,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            OpCode::Root(op) => op.value(),
            OpCode::Intermediate(op) => op.value(),
            OpCode::Wallet(op) => op.value(),
            OpCode::Channel(op) => op.value(),
            OpCode::Storage(op) => op.value(),
        }
    }

    /// The single channel status this code may be applied from
    pub fn required_status(&self) -> ChannelStatus {
        match self {
            OpCode::Channel(op) => op.required_status(),
            OpCode::Wallet(
                WalletOp::InitWallet
                | WalletOp::Deposit
                | WalletOp::OpenChannel
                | WalletOp::LockFunds,
            ) => ChannelStatus::Pending,
            _ => ChannelStatus::Active,
        }
    }
}

impl From<ChannelOp> for OpCode {
    fn from(op: ChannelOp) -> Self {
        OpCode::Channel(op)
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:0x{:02X}", self.layer(), self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_overlapping_codes_resolved_by_layer() {
        assert_eq!(
            OpCode::try_from_layer(OpLayer::Root, 0x20).unwrap(),
            OpCode::Root(RootOp::SendMessage)
        );
        assert_eq!(
            OpCode::try_from_layer(OpLayer::Intermediate, 0x20).unwrap(),
            OpCode::Intermediate(IntermediateOp::ForwardMessage)
        );
        assert_ne!(
            OpCode::try_from_layer(OpLayer::Root, 0x22).unwrap(),
            OpCode::try_from_layer(OpLayer::Intermediate, 0x22).unwrap()
        );
    }

    #[test]
    fn test_undeclared_value_rejected() {
        let err = OpCode::try_from_layer(OpLayer::Channel, 0xA3).unwrap_err();
        match err {
            SluiceError::InvalidOpCode { layer, value } => {
                assert_eq!(layer, "channel");
                assert_eq!(value, 0xA3);
            }
            other => panic!("unexpected error {:?}", other),
        }
        // in range for another layer is still invalid here
        assert!(OpCode::try_from_layer(OpLayer::Channel, 0x01).is_err());
        assert!(ChannelOp::try_from(0x1A0u32).is_err());
    }

    #[test]
    fn test_value_roundtrip_every_layer() {
        for op in RootOp::ALL {
            assert_eq!(RootOp::try_from(op.value()).unwrap(), *op);
        }
        for op in IntermediateOp::ALL {
            assert_eq!(IntermediateOp::try_from(op.value()).unwrap(), *op);
        }
        for op in WalletOp::ALL {
            assert_eq!(WalletOp::try_from(op.value()).unwrap(), *op);
        }
        for op in ChannelOp::ALL {
            assert_eq!(ChannelOp::try_from(op.value()).unwrap(), *op);
        }
        for op in StorageOp::ALL {
            assert_eq!(StorageOp::try_from(op.value()).unwrap(), *op);
        }
    }

    #[test]
    fn test_required_status() {
        assert_eq!(
            OpCode::from(ChannelOp::InitChannel).required_status(),
            ChannelStatus::Pending
        );
        assert_eq!(
            OpCode::from(ChannelOp::CreatePayment).required_status(),
            ChannelStatus::Active
        );
        assert_eq!(
            OpCode::Wallet(WalletOp::OpenChannel).required_status(),
            ChannelStatus::Pending
        );
        assert_eq!(
            OpCode::Wallet(WalletOp::Transfer).required_status(),
            ChannelStatus::Active
        );
        assert_eq!(
            OpCode::Storage(StorageOp::Prune).required_status(),
            ChannelStatus::Active
        );
    }

    #[test]
    fn test_proof_requirements() {
        assert!(ChannelOp::CreatePayment.requires_proof());
        assert!(ChannelOp::CloseChannel.requires_proof());
        assert!(!ChannelOp::SendMessage.requires_proof());
        assert!(!ChannelOp::InitChannel.requires_proof());
        assert_eq!(ChannelOp::default(), ChannelOp::SendMessage);
    }

    proptest! {
        #[test]
        fn prop_try_from_layer_is_total(value in any::<u32>(), layer in 0usize..5) {
            let layer = OpLayer::ALL[layer];
            if let Ok(code) = OpCode::try_from_layer(layer, value) {
                prop_assert_eq!(code.layer(), layer);
                prop_assert_eq!(code.value() as u32, value);
            }
        }
    }
}
