// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

pub mod parse;
pub mod ring;
pub mod sample;
pub mod wav;

pub type DynResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub use parse::{parse_bool, parse_float, yes_no};
pub use ring::{IqRing, ReadStatus, RingProducer, RingReader};
pub use sample::{ContainerKind, IqSample, SampleEncoding};
