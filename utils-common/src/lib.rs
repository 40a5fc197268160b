// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC

#![no_std]

pub mod alloc;
