pub(crate) mod constants {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 15;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 16;
    pub(crate) const READ_FILE_RECORD: u8 = 20;
    pub(crate) const WRITE_FILE_RECORD: u8 = 21;
    pub(crate) const READ_FIFO_QUEUE: u8 = 24;
    pub(crate) const ERROR_DELIMITER: u8 = 0x80;
}

/// Set of function codes understood by both the master and listener sides
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReadFileRecord,
    WriteFileRecord,
    ReadFifoQueue,
}

impl FunctionCode {
    pub(crate) const fn get_value(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => constants::READ_COILS,
            FunctionCode::ReadDiscreteInputs => constants::READ_DISCRETE_INPUTS,
            FunctionCode::ReadHoldingRegisters => constants::READ_HOLDING_REGISTERS,
            FunctionCode::ReadInputRegisters => constants::READ_INPUT_REGISTERS,
            FunctionCode::WriteSingleCoil => constants::WRITE_SINGLE_COIL,
            FunctionCode::WriteSingleRegister => constants::WRITE_SINGLE_REGISTER,
            FunctionCode::WriteMultipleCoils => constants::WRITE_MULTIPLE_COILS,
            FunctionCode::WriteMultipleRegisters => constants::WRITE_MULTIPLE_REGISTERS,
            FunctionCode::ReadFileRecord => constants::READ_FILE_RECORD,
            FunctionCode::WriteFileRecord => constants::WRITE_FILE_RECORD,
            FunctionCode::ReadFifoQueue => constants::READ_FIFO_QUEUE,
        }
    }

    pub(crate) const fn as_error(self) -> u8 {
        self.get_value() | constants::ERROR_DELIMITER
    }

    pub(crate) fn get(value: u8) -> Option<Self> {
        match value {
            constants::READ_COILS => Some(FunctionCode::ReadCoils),
            constants::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            constants::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            constants::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            constants::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            constants::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            constants::WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            constants::WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            constants::READ_FILE_RECORD => Some(FunctionCode::ReadFileRecord),
            constants::WRITE_FILE_RECORD => Some(FunctionCode::WriteFileRecord),
            constants::READ_FIFO_QUEUE => Some(FunctionCode::ReadFifoQueue),
            _ => None,
        }
    }
}

impl std::fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            FunctionCode::ReadCoils => f.write_str("READ COILS"),
            FunctionCode::ReadDiscreteInputs => f.write_str("READ DISCRETE INPUTS"),
            FunctionCode::ReadHoldingRegisters => f.write_str("READ HOLDING REGISTERS"),
            FunctionCode::ReadInputRegisters => f.write_str("READ INPUT REGISTERS"),
            FunctionCode::WriteSingleCoil => f.write_str("WRITE SINGLE COIL"),
            FunctionCode::WriteSingleRegister => f.write_str("WRITE SINGLE REGISTER"),
            FunctionCode::WriteMultipleCoils => f.write_str("WRITE MULTIPLE COILS"),
            FunctionCode::WriteMultipleRegisters => f.write_str("WRITE MULTIPLE REGISTERS"),
            FunctionCode::ReadFileRecord => f.write_str("READ FILE RECORD"),
            FunctionCode::WriteFileRecord => f.write_str("WRITE FILE RECORD"),
            FunctionCode::ReadFifoQueue => f.write_str("READ FIFO QUEUE"),
        }
    }
}
