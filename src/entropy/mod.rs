//! Entropy back ends writing symbols to a bitstream
//!
//! The arithmetic coder consumes full discrete distributions; the
//! Rice-Golomb coder only needs the mean and variance of a Laplacian model.
//! [`Backend`] selects between them at run time behind [`EntropyCoder`].

pub mod arithmetic;
pub mod bitqueue;
pub mod golomb;

pub use arithmetic::ArithmeticCoder;
pub use bitqueue::BitQueue;
pub use golomb::RiceGolombCoder;

use crate::distribution::DistributionMaker;
use crate::io::configuration::BackendKind;
use crate::io::error::{CodecError, Result};

/// Probability model handed to a back end for one symbol
#[derive(Debug)]
pub enum SymbolModel<'a> {
    /// Discrete distribution over the alphabet
    Distribution(&'a mut DistributionMaker),
    /// Two-sided geometric model around a mean
    Laplacian {
        /// Predicted value
        mean: f64,
        /// Predicted residual variance
        variance: f64,
        /// Alphabet size
        symbols: u32,
    },
}

/// Symbol-level interface shared by the back ends
pub trait EntropyCoder {
    /// Append `symbol` to the bitstream
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not suit the back end or gives the
    /// symbol no probability
    fn encode(&mut self, symbol: u32, model: SymbolModel<'_>) -> Result<()>;

    /// Read the next symbol from the bitstream
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not suit the back end or the
    /// bitstream is exhausted or corrupt
    fn decode(&mut self, model: SymbolModel<'_>) -> Result<u32>;

    /// Flush pending state after the last symbol
    fn finalize(&mut self);

    /// Code length of `symbol` in bits
    ///
    /// # Errors
    ///
    /// Returns an error if the model does not suit the back end
    fn costs(&self, symbol: u32, model: SymbolModel<'_>) -> Result<f64>;

    /// Bits written or loaded so far
    fn queue(&self) -> &BitQueue;
}

const fn mismatch(backend: BackendKind) -> CodecError {
    CodecError::ModelMismatch {
        backend: backend.name(),
    }
}

impl EntropyCoder for ArithmeticCoder {
    fn encode(&mut self, symbol: u32, model: SymbolModel<'_>) -> Result<()> {
        match model {
            SymbolModel::Distribution(maker) => Self::encode(self, symbol, maker),
            SymbolModel::Laplacian { .. } => Err(mismatch(BackendKind::Arithmetic)),
        }
    }

    fn decode(&mut self, model: SymbolModel<'_>) -> Result<u32> {
        match model {
            SymbolModel::Distribution(maker) => Self::decode(self, maker),
            SymbolModel::Laplacian { .. } => Err(mismatch(BackendKind::Arithmetic)),
        }
    }

    fn finalize(&mut self) {
        Self::finalize(self);
    }

    fn costs(&self, symbol: u32, model: SymbolModel<'_>) -> Result<f64> {
        match model {
            SymbolModel::Distribution(maker) => Ok(Self::costs(symbol, maker)),
            SymbolModel::Laplacian { .. } => Err(mismatch(BackendKind::Arithmetic)),
        }
    }

    fn queue(&self) -> &BitQueue {
        Self::queue(self)
    }
}

impl EntropyCoder for RiceGolombCoder {
    fn encode(&mut self, symbol: u32, model: SymbolModel<'_>) -> Result<()> {
        match model {
            SymbolModel::Laplacian { mean, variance, .. } => {
                Self::encode(self, symbol, mean, variance);
                Ok(())
            }
            SymbolModel::Distribution(_) => Err(mismatch(BackendKind::Golomb)),
        }
    }

    fn decode(&mut self, model: SymbolModel<'_>) -> Result<u32> {
        match model {
            SymbolModel::Laplacian {
                mean,
                variance,
                symbols,
            } => Self::decode(self, mean, variance, symbols),
            SymbolModel::Distribution(_) => Err(mismatch(BackendKind::Golomb)),
        }
    }

    fn finalize(&mut self) {
        Self::finalize(self);
    }

    fn costs(&self, symbol: u32, model: SymbolModel<'_>) -> Result<f64> {
        match model {
            SymbolModel::Laplacian { mean, variance, .. } => Ok(Self::costs(symbol, mean, variance)),
            SymbolModel::Distribution(_) => Err(mismatch(BackendKind::Golomb)),
        }
    }

    fn queue(&self) -> &BitQueue {
        Self::queue(self)
    }
}

/// Run-time choice of back end
#[derive(Debug, Clone)]
pub enum Backend {
    /// Arithmetic coding of full distributions
    Arithmetic(ArithmeticCoder),
    /// Rice-Golomb coding with run mode
    Golomb(RiceGolombCoder),
}

impl Backend {
    /// Fresh encoder of the given kind
    pub fn encoder(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Arithmetic => Self::Arithmetic(ArithmeticCoder::new()),
            BackendKind::Golomb => Self::Golomb(RiceGolombCoder::new()),
        }
    }

    /// Decoder of the given kind over `bytes`
    pub fn decoder(kind: BackendKind, bytes: &[u8]) -> Self {
        match kind {
            BackendKind::Arithmetic => Self::Arithmetic(ArithmeticCoder::from_bytes(bytes)),
            BackendKind::Golomb => Self::Golomb(RiceGolombCoder::from_bytes(bytes)),
        }
    }

    /// Kind of the wrapped back end
    pub const fn kind(&self) -> BackendKind {
        match self {
            Self::Arithmetic(_) => BackendKind::Arithmetic,
            Self::Golomb(_) => BackendKind::Golomb,
        }
    }

    fn as_coder(&mut self) -> &mut dyn EntropyCoder {
        match self {
            Self::Arithmetic(coder) => coder,
            Self::Golomb(coder) => coder,
        }
    }

    fn as_coder_ref(&self) -> &dyn EntropyCoder {
        match self {
            Self::Arithmetic(coder) => coder,
            Self::Golomb(coder) => coder,
        }
    }

    /// Bitstream packed into bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.queue().to_bytes()
    }
}

impl EntropyCoder for Backend {
    fn encode(&mut self, symbol: u32, model: SymbolModel<'_>) -> Result<()> {
        self.as_coder().encode(symbol, model)
    }

    fn decode(&mut self, model: SymbolModel<'_>) -> Result<u32> {
        self.as_coder().decode(model)
    }

    fn finalize(&mut self) {
        self.as_coder().finalize();
    }

    fn costs(&self, symbol: u32, model: SymbolModel<'_>) -> Result<f64> {
        self.as_coder_ref().costs(symbol, model)
    }

    fn queue(&self) -> &BitQueue {
        self.as_coder_ref().queue()
    }
}
