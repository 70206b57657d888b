// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Typed repositories, one per entity.

pub mod accounts;
pub mod jobs;
pub mod tokens;
pub mod transfers;
