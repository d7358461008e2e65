// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `version` command.

use crate::cli::Cli;
use crate::error::BinResult;

/// Displays version information.
pub fn version(_cli: &Cli) -> BinResult<()> {
    println!("strand - OPC UA client");
    println!();
    println!("Version Information:");
    println!("  strand-bin:   {}", crate::VERSION);
    println!("  strand-opcua: {}", strand_opcua::VERSION);
    println!();
    println!("Build Information:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!();
    println!("Supported:");
    println!("  Transport:    opc.tcp (UA binary)");
    println!("  Encodings:    binary, JSON");
    println!();
    println!("License: PolyForm Noncommercial License 1.0.0");
    println!("Copyright (c) 2025 Sylvex. All rights reserved.");

    Ok(())
}
